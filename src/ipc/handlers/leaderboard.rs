use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::auth::require_session;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_leaderboard_rankings(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // A session is still required, but the rankings deliberately read
    // every owner's records (see DESIGN.md).
    if let Err(e) = require_session(state, req) {
        return e;
    }

    match calc::compute_leaderboard(conn) {
        Ok(rankings) => ok(&req.id, json!({ "rankings": rankings })),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "leaderboard.rankings" => Some(handle_leaderboard_rankings(state, req)),
        _ => None,
    }
}
