// Core value types shared by every layer of the engine

pub mod bar;
pub mod event;
pub mod frequency;

pub use bar::{batch_frequency, Bar, BarError, Bars};
pub use event::{Event, SubscriptionId};
pub use frequency::Frequency;
