// Seoul bus position board.
//
// The bus open API (ws.bus.go.kr) answers in XML even when asked for JSON.
// Responses are read into a markup tree, transformed into a JSON-like tree,
// and reconciled every poll cycle into a stop-indexed placement list that the
// HTTP surface serves.

pub mod board;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod markup;
pub mod normalize;
pub mod poller;
pub mod reconcile;
pub mod server;
pub mod transform;
