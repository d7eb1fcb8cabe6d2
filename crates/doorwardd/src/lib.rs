//! doorwardd: the door access controller daemon.
//!
//! Wires the camera's latest-frame cell, the recognition engine thread and
//! the door outputs into the access controller, and runs the background
//! workers that talk to the backend: notifications, live view, door-state
//! sync and gallery refresh. Remote commands and the UI call button arrive
//! over the local HTTP surface.

pub mod backend;
pub mod call;
pub mod config;
pub mod controller;
pub mod door;
pub mod door_sync;
pub mod engine;
pub mod gallery_sync;
pub mod http;
pub mod notifier;
pub mod panel;
pub mod queue;
pub mod remote;
pub mod streaming;
pub mod vision_client;

#[cfg(test)]
mod testing;
