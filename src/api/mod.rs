//! REST layer: the collaborator API client and its DTOs.
//!
//! Room lists, room history, and room creation/lookup live behind a
//! plain request/response interface; the store owns the in-memory cache
//! built from these results.

pub mod client;
pub mod dto;

pub use client::ChatApi;
pub use dto::{PageResponse, RoomDto};
