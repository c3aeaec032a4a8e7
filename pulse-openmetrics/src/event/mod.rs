// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod fields;
pub mod grouper;

pub use fields::Fields;
pub use grouper::EventGrouper;
use serde::Serialize;

//
// Event
//

// A finished document along with the namespace it is reported under.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
  pub namespace: String,
  pub fields: Fields,
}

//
// Reporter
//

// Receives finished events. Returning false means the consumer is closing and no further events
// should be sent during the current cycle.
pub trait Reporter {
  fn event(&mut self, event: Event) -> bool;
}

// Hand each document to the reporter until it asks to stop. Returns how many events were
// accepted.
pub fn report_all(
  namespace: &str,
  documents: impl IntoIterator<Item = Fields>,
  reporter: &mut impl Reporter,
) -> usize {
  let mut reported = 0;
  for fields in documents {
    let accepted = reporter.event(Event {
      namespace: namespace.to_string(),
      fields,
    });
    if !accepted {
      log::debug!("reporter closing after {reported} events in namespace {namespace}");
      break;
    }
    reported += 1;
  }
  reported
}
