mod outcome_view;
mod painter;
mod table;

pub(crate) use self::outcome_view::{CancelledView, ClassificationView, IdentityView, OutcomeView};
pub(crate) use self::painter::Painter;
