// Local HTTP service for the lineup manager.

pub mod api;
pub mod state;
