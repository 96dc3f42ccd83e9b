pub mod modal;
pub mod sink_view;
pub mod status_bar;

pub use modal::{ConfirmPrompt, Modal};
pub use sink_view::SinkView;
pub use status_bar::{SlotAlignment, StatusBar, StatusSlot};
