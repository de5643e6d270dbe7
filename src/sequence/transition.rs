//! Stage transition table.
//!
//! Pure decision function: given where a contact stands and whether (and how)
//! they replied, what should happen next. Negative and neutral replies follow
//! the no-reply column.

use crate::contacts::model::{Sentiment, Stage};
use crate::templates::model::{CONVERSION, LIMITED_TIME_OFFER, RE_ENGAGEMENT};

/// Step number recorded when a contact converts.
pub const CONVERTED_STEP: u8 = 3;

/// What the engine should do with one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send `template`, then move to `stage` / `step`.
    Send {
        template: &'static str,
        stage: Stage,
        step: u8,
    },
    /// Move to `converted` without sending anything.
    Convert,
    /// Nothing to do this time.
    Hold,
}

impl Action {
    fn send(template: &'static str, stage: Stage, step: u8) -> Self {
        Self::Send {
            template,
            stage,
            step,
        }
    }
}

/// Decide the next action.
pub fn next_action(stage: Stage, replied: bool, sentiment: Sentiment) -> Action {
    let positive = replied && sentiment == Sentiment::Positive;

    match (stage, positive) {
        (Stage::Contacted, true) => Action::send(CONVERSION, Stage::Interested, 1),
        (Stage::Contacted, false) => Action::send(RE_ENGAGEMENT, Stage::ReEngaged, 1),

        (Stage::ReEngaged, true) => Action::send(CONVERSION, Stage::Interested, 2),
        (Stage::ReEngaged, false) => Action::send(LIMITED_TIME_OFFER, Stage::Lto, 2),

        (Stage::Interested, true) => Action::Convert,
        (Stage::Interested, false) => Action::send(LIMITED_TIME_OFFER, Stage::Lto, 2),

        (Stage::Lto, true) => Action::Convert,
        (Stage::Lto, false) => Action::Hold,

        // `new` is only advanced by launch; `converted` is terminal.
        (Stage::New | Stage::Converted, _) => Action::Hold,
    }
}
