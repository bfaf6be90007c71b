//! Storefront chat client: conversation with the remote shopping
//! assistant, response polling and payment offer tracking.

pub mod api;
pub mod messages;
pub mod session;

pub use api::ChatApi;
pub use messages::{ChatMessage, ChatResponse, PaymentOffer, Sender};
pub use session::{ChatDeps, ChatSession, ChatState};
