//! Record listing and mutations within one hosted zone.
//!
//! Record forms carry repeated `value` fields, which the plain form
//! extractor cannot represent, so mutation handlers parse the buffered
//! body themselves.

use super::{audit, client_ip, role_of};
use crate::auth::SessionInfo;
use crate::dns::{parse_ttl, qualify_name, ChangeAction, RecordChange, RecordSet};
use crate::store::AuditEntry;
use crate::ui::render;
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Extension;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Serialize)]
struct RecordsTemplate {
    title: String,
    username: String,
    role: String,
    csrf_token: String,
    error: Option<String>,
    flash: Option<String>,
    zone_id: String,
    zone_name: String,
    zone_domain: String,
    records: Vec<RecordSet>,
}

/// A parsed record mutation form. Repeated `value` and `original_value`
/// fields accumulate; everything else is single-valued.
#[derive(Debug, Default)]
struct RecordForm {
    fields: HashMap<String, String>,
    values: Vec<String>,
    original_values: Vec<String>,
}

impl RecordForm {
    fn parse(body: &[u8]) -> Self {
        let mut form = RecordForm::default();
        for (key, value) in form_urlencoded::parse(body) {
            match &*key {
                "value" => form.values.push(value.into_owned()),
                "original_value" => form.original_values.push(value.into_owned()),
                _ => {
                    form.fields.insert(key.into_owned(), value.into_owned());
                }
            }
        }
        form
    }

    fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}

fn records_url(zone_id: &str, msg: &str) -> String {
    format!(
        "/zones/{}/records?msg={}",
        zone_id,
        urlencoding::encode(msg)
    )
}

pub async fn list_records(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Extension(session): Extension<SessionInfo>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let role = role_of(&state.store, &session.username).await;

    let zone = match state.zones.get_zone(&zone_id).await {
        Ok(zone) => zone,
        Err(e) => {
            return render(
                &state.templates,
                "records.html",
                RecordsTemplate {
                    title: "Records".to_string(),
                    username: session.username,
                    role,
                    csrf_token: session.csrf_token,
                    error: Some(format!("Failed to load zone: {}", e)),
                    flash: None,
                    zone_id: zone_id.clone(),
                    zone_name: zone_id.clone(),
                    zone_domain: String::new(),
                    records: Vec::new(),
                },
            );
        }
    };

    let (records, error) = match state.zones.list_records(&zone_id).await {
        Ok(records) => (records, None),
        Err(e) => (Vec::new(), Some(format!("Failed to load records: {}", e))),
    };

    let zone_name = if zone.label.is_empty() {
        zone.name.clone()
    } else {
        zone.label.clone()
    };

    render(
        &state.templates,
        "records.html",
        RecordsTemplate {
            title: zone_name.clone(),
            username: session.username,
            role,
            csrf_token: session.csrf_token,
            error,
            flash: params.get("msg").cloned(),
            zone_id,
            zone_name,
            zone_domain: zone.name,
            records,
        },
    )
}

pub async fn refresh_records(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
) -> Response {
    state.zones.refresh_records(&zone_id).await;
    Redirect::to(&format!("/zones/{}/records", zone_id)).into_response()
}

pub async fn create_record(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Extension(session): Extension<SessionInfo>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = RecordForm::parse(&body);

    let zone_domain = state
        .zones
        .get_zone(&zone_id)
        .await
        .map(|zone| zone.name)
        .unwrap_or_default();

    let change = RecordChange {
        action: ChangeAction::Create,
        name: qualify_name(form.field("name"), &zone_domain),
        rtype: form.field("type").to_string(),
        ttl: parse_ttl(form.field("ttl")),
        values: form.values.clone(),
    };

    let msg = match state.zones.change_record(&zone_id, &change).await {
        Ok(()) => "Record created successfully".to_string(),
        Err(e) => format!("Error: {}", e),
    };

    audit(
        &state.store,
        AuditEntry {
            username: session.username,
            action: "create_record".to_string(),
            zone_id: zone_id.clone(),
            record_name: change.name.clone(),
            record_type: change.rtype.clone(),
            detail: format!("values={:?} ttl={}", change.values, change.ttl),
            ip_address: client_ip(&headers),
            ..Default::default()
        },
    )
    .await;

    Redirect::to(&records_url(&zone_id, &msg)).into_response()
}

pub async fn edit_record(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Extension(session): Extension<SessionInfo>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = RecordForm::parse(&body);

    let zone_domain = state
        .zones
        .get_zone(&zone_id)
        .await
        .map(|zone| zone.name)
        .unwrap_or_default();

    let original_name = form.field("original_name").to_string();
    let original_type = form.field("original_type").to_string();
    let new_name = qualify_name(form.field("name"), &zone_domain);
    let new_type = form.field("type").to_string();

    // Same name and type: one atomic upsert.
    if original_name == new_name && original_type == new_type {
        let change = RecordChange {
            action: ChangeAction::Upsert,
            name: new_name,
            rtype: new_type,
            ttl: parse_ttl(form.field("ttl")),
            values: form.values.clone(),
        };

        let msg = match state.zones.change_record(&zone_id, &change).await {
            Ok(()) => "Record updated successfully".to_string(),
            Err(e) => format!("Error updating record: {}", e),
        };

        audit(
            &state.store,
            AuditEntry {
                username: session.username,
                action: "edit_record".to_string(),
                zone_id: zone_id.clone(),
                record_name: change.name.clone(),
                record_type: change.rtype.clone(),
                detail: format!("upsert ttl={} values={:?}", change.ttl, change.values),
                ip_address: client_ip(&headers),
                ..Default::default()
            },
        )
        .await;

        return Redirect::to(&records_url(&zone_id, &msg)).into_response();
    }

    // Renamed or retyped: delete the old set, then create the new one.
    // Not atomic; the delete failing aborts before anything is created.
    let delete = RecordChange {
        action: ChangeAction::Delete,
        name: original_name.clone(),
        rtype: original_type,
        ttl: parse_ttl(form.field("original_ttl")),
        values: form.original_values.clone(),
    };
    if let Err(e) = state.zones.change_record(&zone_id, &delete).await {
        let msg = format!("Error deleting old record: {}", e);
        return Redirect::to(&records_url(&zone_id, &msg)).into_response();
    }

    let create = RecordChange {
        action: ChangeAction::Create,
        name: new_name,
        rtype: new_type,
        ttl: parse_ttl(form.field("ttl")),
        values: form.values.clone(),
    };
    let msg = match state.zones.change_record(&zone_id, &create).await {
        Ok(()) => "Record updated successfully".to_string(),
        Err(e) => format!("Error creating new record: {}", e),
    };

    audit(
        &state.store,
        AuditEntry {
            username: session.username,
            action: "edit_record".to_string(),
            zone_id: zone_id.clone(),
            record_name: create.name.clone(),
            record_type: create.rtype.clone(),
            detail: format!("rename from {} used 2-step update", original_name),
            ip_address: client_ip(&headers),
            ..Default::default()
        },
    )
    .await;

    Redirect::to(&records_url(&zone_id, &msg)).into_response()
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Extension(session): Extension<SessionInfo>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = RecordForm::parse(&body);

    let change = RecordChange {
        action: ChangeAction::Delete,
        name: form.field("name").to_string(),
        rtype: form.field("type").to_string(),
        ttl: parse_ttl(form.field("ttl")),
        values: form.values.clone(),
    };

    let msg = match state.zones.change_record(&zone_id, &change).await {
        Ok(()) => "Record deleted successfully".to_string(),
        Err(e) => format!("Error: {}", e),
    };

    audit(
        &state.store,
        AuditEntry {
            username: session.username,
            action: "delete_record".to_string(),
            zone_id: zone_id.clone(),
            record_name: change.name.clone(),
            record_type: change.rtype.clone(),
            ip_address: client_ip(&headers),
            ..Default::default()
        },
    )
    .await;

    Redirect::to(&records_url(&zone_id, &msg)).into_response()
}
