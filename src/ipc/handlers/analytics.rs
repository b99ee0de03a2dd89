use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::auth::require_session;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_analytics_data(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    // The chart consumer treats any transport failure as a broken page,
    // so computation failures travel inside the payload as a status.
    match calc::compute_analytics(&ctx) {
        Ok(calc::AnalyticsData::Empty) => ok(&req.id, json!({ "status": "empty" })),
        Ok(calc::AnalyticsData::Ready {
            subjects,
            subject_averages,
            distribution,
            attendance_marks,
        }) => ok(
            &req.id,
            json!({
                "status": "success",
                "subjects": subjects,
                "subject_averages": subject_averages,
                "distribution": distribution,
                "attendance_marks": attendance_marks
            }),
        ),
        Err(e) => {
            tracing::warn!(code = %e.code, message = %e.message, "analytics computation failed");
            ok(
                &req.id,
                json!({
                    "status": "error",
                    "message": e.message
                }),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.data" => Some(handle_analytics_data(state, req)),
        _ => None,
    }
}
