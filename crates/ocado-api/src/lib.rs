//! Client library for the Ocado mobile API.
//!
//! Speaks the same wire protocol as the Ocado iOS application: bearer
//! session tokens in an `Authorization: token:<...>` header, a per-session
//! request sequence counter, and a fixed set of JSON resource endpoints.
//!
//! The client is stateless with respect to credentials: every call takes the
//! token to use, and a `401` surfaces as [`ApiError::Unauthorized`] for the
//! caller to handle. Token custody, refresh scheduling, and retry policy
//! live in the consuming application.

pub mod client;
pub mod error;
pub mod models;

pub use client::{ClientOptions, OcadoClient, RefreshResponse};
pub use error::ApiError;
pub use models::{Cart, DeliverySlot, DeliverySubscription, Order, RecentOrders, UserProfile};
