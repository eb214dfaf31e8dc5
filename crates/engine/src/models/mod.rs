//! Domain models for the recovery engine.

pub mod cart;
pub mod email_event;

pub use cart::{Cart, CartSync, LineItem, LineItemError, total_of};
pub use email_event::{EmailEvent, NewEmailEvent};
