//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between a lesson client and the API
//! server. One connection follows one lesson's progress record.

use progress_sync_core::ProgressRecord;
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Writes a record through the same path as `PUT /progress`.
    Push { record: Box<ProgressRecord> },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Every accepted write to the lesson, including the client's own.
    ProgressChanged { record: Box<ProgressRecord> },

    /// The result of a `push`, as stored.
    PushAccepted {
        record: Box<ProgressRecord>,
        merged: bool,
    },

    /// Reports a failed push or a broken change stream. The connection stays open.
    Error { message: String },
}
