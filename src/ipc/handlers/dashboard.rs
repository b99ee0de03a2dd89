use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::auth::require_session;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn calc_err(req: &Request, e: calc::CalcError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details)
}

fn handle_dashboard_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user = match require_session(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let ctx = calc::CalcContext {
        conn,
        owner_id: &user.user_id,
    };
    match calc::compute_dashboard_summary(&ctx) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(handle_dashboard_summary(state, req)),
        _ => None,
    }
}
