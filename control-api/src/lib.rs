//! HTTP control plane for NVRLite
//!
//! Exposes the REST surface that starts/stops ingestion and recording per
//! stream, reports status, and manages the recordings folder. Handlers talk
//! to the workers exclusively through command channels and observe their
//! progress through the notification pump in [`state`].
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `POST /stream/start` | Enable RTSP ingestion for a stream |
//! | `POST /stream/stop` | Disable ingestion |
//! | `POST /record/start` | Start recording (pre-roll included) |
//! | `POST /record/stop` | Stop recording (post-roll appended) |
//! | `GET /stream/status` | Per-stream or all-streams snapshot |
//! | `GET /files/list` | List recordings, newest first |
//! | `GET /files/status` | Stat one recording |
//! | `POST /files/remove` | Delete one recording |

pub mod error;
pub mod files;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::control_router;
pub use state::{run_notifications, ControlState, StreamControl, StreamHandles};
