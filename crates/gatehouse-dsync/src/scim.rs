//! SCIM 2.0 request router
//!
//! Translates inbound SCIM lifecycle calls into user/group store mutations
//! and webhook events. The HTTP boundary authenticates the directory bearer
//! secret first and hands a resolved [`Directory`] in; everything here is
//! transport-agnostic.

use serde_json::{json, Map, Value};
use tracing::{instrument, warn};

use gatehouse_core::{
    Directory, DirectoryGroup, DirectorySyncEvent, DirectorySyncEventType, DirectoryUser,
};

use crate::directories::DirectoryController;
use crate::events::EventDispatcher;
use crate::groups::Groups;
use crate::users::Users;

pub const LIST_RESPONSE_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:ListResponse";
pub const ERROR_SCHEMA: &str = "urn:ietf:params:scim:api:messages:2.0:Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScimMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScimResource {
    Users,
    Groups,
}

#[derive(Debug, Clone)]
pub struct ScimRequest {
    pub method: ScimMethod,
    pub resource: ScimResource,
    pub resource_id: Option<String>,
    /// SCIM filter expression, e.g. `userName eq "jdoe"`.
    pub filter: Option<String>,
    /// 1-based, per the SCIM list protocol.
    pub start_index: usize,
    /// 0 means no explicit count.
    pub count: usize,
    pub body: Option<Value>,
}

impl ScimRequest {
    pub fn new(method: ScimMethod, resource: ScimResource) -> Self {
        Self {
            method,
            resource,
            resource_id: None,
            filter: None,
            start_index: 1,
            count: 0,
            body: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ScimResponse {
    pub status: u16,
    pub body: Value,
}

impl ScimResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    fn error(status: u16, detail: &str) -> Self {
        Self {
            status,
            body: json!({
                "schemas": [ERROR_SCHEMA],
                "detail": detail,
                "status": status,
            }),
        }
    }

    fn list(resources: Vec<Value>, total: usize, start_index: usize) -> Self {
        Self::ok(json!({
            "schemas": [LIST_RESPONSE_SCHEMA],
            "totalResults": total,
            "startIndex": start_index,
            "itemsPerPage": resources.len(),
            "Resources": resources,
        }))
    }
}

/// `attribute eq "value"` — the only filter shape directory providers send.
fn parse_eq_filter(filter: &str) -> Option<(&str, &str)> {
    let (attribute, value) = filter.split_once(" eq ")?;
    let value = value.trim().trim_matches('"');
    Some((attribute.trim(), value))
}

fn user_from_raw(id: &str, raw: &Value) -> DirectoryUser {
    let email = raw
        .pointer("/emails/0/value")
        .and_then(Value::as_str)
        .or_else(|| raw.get("userName").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    let mut raw = raw.clone();
    if let Some(map) = raw.as_object_mut() {
        map.insert("id".into(), json!(id));
    }
    DirectoryUser {
        id: id.to_string(),
        email,
        first_name: raw
            .pointer("/name/givenName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        last_name: raw
            .pointer("/name/familyName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        active: raw.get("active").and_then(Value::as_bool).unwrap_or(true),
        raw,
    }
}

fn group_from_raw(id: &str, raw: &Value) -> DirectoryGroup {
    let mut raw = raw.clone();
    if let Some(map) = raw.as_object_mut() {
        map.insert("id".into(), json!(id));
    }
    DirectoryGroup {
        id: id.to_string(),
        name: raw
            .get("displayName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        raw,
    }
}

/// Merge a PATCH `replace` payload into a raw record, honoring dotted paths
/// like `name.givenName`.
fn apply_replace(raw: &mut Value, path: Option<&str>, value: &Value) {
    match path {
        Some(path) => {
            let pointer = format!("/{}", path.replace('.', "/"));
            if let Some(slot) = raw.pointer_mut(&pointer) {
                *slot = value.clone();
            } else if let (Some(map), None) = (raw.as_object_mut(), path.find('.')) {
                map.insert(path.to_string(), value.clone());
            }
        }
        None => {
            if let (Some(target), Some(updates)) = (raw.as_object_mut(), value.as_object()) {
                for (k, v) in updates {
                    target.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

/// Member ids from a SCIM `members` array (`[{value: <id>}, ...]`).
fn member_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m.get("value").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct DirectorySync {
    directories: DirectoryController,
    users: Users,
    groups: Groups,
    dispatcher: EventDispatcher,
}

impl DirectorySync {
    pub fn new(
        directories: DirectoryController,
        users: Users,
        groups: Groups,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            directories,
            users,
            groups,
            dispatcher,
        }
    }

    pub fn directories(&self) -> &DirectoryController {
        &self.directories
    }

    pub fn users(&self) -> &Users {
        &self.users
    }

    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Fire-and-forget from the SCIM caller's perspective; a failed
    /// delivery or log write never changes the SCIM response.
    async fn emit(&self, directory: &Directory, event: DirectorySyncEventType, data: Value) {
        let event = DirectorySyncEvent {
            directory_id: directory.id.clone(),
            event,
            data,
            tenant: directory.tenant.clone(),
            product: directory.product.clone(),
        };
        if let Err(e) = self.dispatcher.send_event(directory, &event).await {
            warn!(error = %e, directory_id = %directory.id, "Event dispatch failed");
        }
    }

    #[instrument(skip(self, directory, request), fields(directory_id = %directory.id, method = ?request.method, resource = ?request.resource))]
    pub async fn handle_request(
        &self,
        directory: &Directory,
        request: ScimRequest,
    ) -> ScimResponse {
        let result = match request.resource {
            ScimResource::Users => self.handle_users(directory, &request).await,
            ScimResource::Groups => self.handle_groups(directory, &request).await,
        };
        match result {
            Ok(response) => response,
            Err(e) => ScimResponse::error(e.status_code(), &e.to_string()),
        }
    }

    async fn handle_users(
        &self,
        directory: &Directory,
        request: &ScimRequest,
    ) -> gatehouse_core::Result<ScimResponse> {
        match (request.method, request.resource_id.as_deref()) {
            (ScimMethod::Post, None) => {
                let Some(body) = &request.body else {
                    return Ok(ScimResponse::error(400, "Invalid request body"));
                };
                let id = uuid::Uuid::new_v4().to_string();
                let user = user_from_raw(&id, body);
                self.users.create(&directory.id, &user).await?;
                self.emit(
                    directory,
                    DirectorySyncEventType::UserCreated,
                    serde_json::to_value(&user).unwrap_or_default(),
                )
                .await;
                Ok(ScimResponse::created(user.raw))
            }
            (ScimMethod::Get, Some(id)) => match self.users.get(&directory.id, id).await? {
                Some(user) => Ok(ScimResponse::ok(user.raw)),
                None => Ok(ScimResponse::error(404, "User not found")),
            },
            (ScimMethod::Get, None) => {
                if let Some((attribute, value)) =
                    request.filter.as_deref().and_then(parse_eq_filter)
                {
                    if attribute != "userName" {
                        return Ok(ScimResponse::error(400, "Unsupported filter attribute"));
                    }
                    let found = self.users.get_by_user_name(&directory.id, value).await?;
                    let resources: Vec<Value> = found.into_iter().map(|u| u.raw).collect();
                    let total = resources.len();
                    return Ok(ScimResponse::list(resources, total, 1));
                }
                let offset = request.start_index.saturating_sub(1);
                let (users, total) = self
                    .users
                    .get_all(&directory.id, offset, request.count)
                    .await?;
                Ok(ScimResponse::list(
                    users.into_iter().map(|u| u.raw).collect(),
                    total,
                    request.start_index,
                ))
            }
            (ScimMethod::Put, Some(id)) => {
                self.users.get_required(&directory.id, id).await?;
                let Some(body) = &request.body else {
                    return Ok(ScimResponse::error(400, "Invalid request body"));
                };
                let user = user_from_raw(id, body);
                self.users.update(&directory.id, &user).await?;
                let event = if user.active {
                    DirectorySyncEventType::UserUpdated
                } else {
                    DirectorySyncEventType::UserDeleted
                };
                self.emit(
                    directory,
                    event,
                    serde_json::to_value(&user).unwrap_or_default(),
                )
                .await;
                Ok(ScimResponse::ok(user.raw))
            }
            (ScimMethod::Patch, Some(id)) => {
                let existing = self.users.get_required(&directory.id, id).await?;
                let operations = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("Operations"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                let mut raw = existing.raw.clone();
                for op in &operations {
                    if op.get("op").and_then(Value::as_str) == Some("replace") {
                        if let Some(value) = op.get("value") {
                            apply_replace(&mut raw, op.get("path").and_then(Value::as_str), value);
                        }
                    }
                }
                let user = user_from_raw(id, &raw);
                self.users.update(&directory.id, &user).await?;

                // `active:false` is a tombstone: consumers see a deletion,
                // the record stays until a real DELETE.
                let deactivated = operations.iter().any(|op| {
                    op.get("op").and_then(Value::as_str) == Some("replace")
                        && op.pointer("/value/active") == Some(&Value::Bool(false))
                });
                let event = if deactivated {
                    DirectorySyncEventType::UserDeleted
                } else {
                    DirectorySyncEventType::UserUpdated
                };
                self.emit(
                    directory,
                    event,
                    serde_json::to_value(&user).unwrap_or_default(),
                )
                .await;
                Ok(ScimResponse::ok(user.raw))
            }
            (ScimMethod::Delete, Some(id)) => {
                let user = self.users.get_required(&directory.id, id).await?;
                self.users.delete(&directory.id, id).await?;
                self.emit(
                    directory,
                    DirectorySyncEventType::UserDeleted,
                    serde_json::to_value(&user).unwrap_or_default(),
                )
                .await;
                Ok(ScimResponse::ok(user.raw))
            }
            _ => Ok(ScimResponse::error(405, "Method not allowed")),
        }
    }

    async fn handle_groups(
        &self,
        directory: &Directory,
        request: &ScimRequest,
    ) -> gatehouse_core::Result<ScimResponse> {
        match (request.method, request.resource_id.as_deref()) {
            (ScimMethod::Post, None) => {
                let Some(body) = &request.body else {
                    return Ok(ScimResponse::error(400, "Invalid request body"));
                };
                let id = uuid::Uuid::new_v4().to_string();
                let group = group_from_raw(&id, body);
                self.groups.create(&directory.id, &group).await?;
                for user_id in member_ids(body.get("members").unwrap_or(&Value::Null)) {
                    self.groups
                        .add_member(&directory.id, &group.id, &user_id)
                        .await?;
                }
                self.emit(
                    directory,
                    DirectorySyncEventType::GroupCreated,
                    serde_json::to_value(&group).unwrap_or_default(),
                )
                .await;
                Ok(ScimResponse::created(group.raw))
            }
            (ScimMethod::Get, Some(id)) => match self.groups.get(&directory.id, id).await? {
                Some(group) => Ok(ScimResponse::ok(self.with_members(directory, group).await?)),
                None => Ok(ScimResponse::error(404, "Group not found")),
            },
            (ScimMethod::Get, None) => {
                if let Some((attribute, value)) =
                    request.filter.as_deref().and_then(parse_eq_filter)
                {
                    if attribute != "displayName" {
                        return Ok(ScimResponse::error(400, "Unsupported filter attribute"));
                    }
                    let found = self.groups.get_by_display_name(&directory.id, value).await?;
                    let resources: Vec<Value> = match found {
                        Some(group) => vec![self.with_members(directory, group).await?],
                        None => Vec::new(),
                    };
                    let total = resources.len();
                    return Ok(ScimResponse::list(resources, total, 1));
                }
                let offset = request.start_index.saturating_sub(1);
                let (groups, total) = self
                    .groups
                    .get_all(&directory.id, offset, request.count)
                    .await?;
                Ok(ScimResponse::list(
                    groups.into_iter().map(|g| g.raw).collect(),
                    total,
                    request.start_index,
                ))
            }
            (ScimMethod::Put, Some(id)) => {
                self.groups.get_required(&directory.id, id).await?;
                let Some(body) = &request.body else {
                    return Ok(ScimResponse::error(400, "Invalid request body"));
                };
                let group = group_from_raw(id, body);
                self.groups.update(&directory.id, &group).await?;
                self.emit(
                    directory,
                    DirectorySyncEventType::GroupUpdated,
                    serde_json::to_value(&group).unwrap_or_default(),
                )
                .await;
                Ok(ScimResponse::ok(group.raw))
            }
            (ScimMethod::Patch, Some(id)) => {
                let mut group = self.groups.get_required(&directory.id, id).await?;
                let operations = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("Operations"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                for op in &operations {
                    let path = op.get("path").and_then(Value::as_str);
                    let value = op.get("value").unwrap_or(&Value::Null);
                    match op.get("op").and_then(Value::as_str) {
                        Some("add") if path == Some("members") || path.is_none() => {
                            for user_id in member_ids(value) {
                                self.groups
                                    .add_member(&directory.id, &group.id, &user_id)
                                    .await?;
                                self.emit_membership(
                                    directory,
                                    &group,
                                    &user_id,
                                    DirectorySyncEventType::GroupUserAdded,
                                )
                                .await?;
                            }
                        }
                        Some("remove") if path.is_some_and(|p| p.starts_with("members")) => {
                            // `members[value eq "<id>"]` or a bare members
                            // path with an explicit value list
                            let targets = if let Some(id) = path
                                .and_then(|p| p.split('"').nth(1))
                                .map(str::to_string)
                            {
                                vec![id]
                            } else {
                                member_ids(value)
                            };
                            for user_id in targets {
                                self.groups
                                    .remove_member(&directory.id, &group.id, &user_id)
                                    .await?;
                                self.emit_membership(
                                    directory,
                                    &group,
                                    &user_id,
                                    DirectorySyncEventType::GroupUserRemoved,
                                )
                                .await?;
                            }
                        }
                        Some("replace") => {
                            let mut raw = group.raw.clone();
                            apply_replace(&mut raw, path, value);
                            group = group_from_raw(id, &raw);
                            self.groups.update(&directory.id, &group).await?;
                            self.emit(
                                directory,
                                DirectorySyncEventType::GroupUpdated,
                                serde_json::to_value(&group).unwrap_or_default(),
                            )
                            .await;
                        }
                        _ => {}
                    }
                }
                Ok(ScimResponse::ok(
                    self.with_members(directory, group).await?,
                ))
            }
            (ScimMethod::Delete, Some(id)) => {
                let group = self.groups.get_required(&directory.id, id).await?;
                self.groups.delete(&directory.id, id).await?;
                self.emit(
                    directory,
                    DirectorySyncEventType::GroupDeleted,
                    serde_json::to_value(&group).unwrap_or_default(),
                )
                .await;
                Ok(ScimResponse::ok(group.raw))
            }
            _ => Ok(ScimResponse::error(405, "Method not allowed")),
        }
    }

    async fn emit_membership(
        &self,
        directory: &Directory,
        group: &DirectoryGroup,
        user_id: &str,
        event: DirectorySyncEventType,
    ) -> gatehouse_core::Result<()> {
        let user = self.users.get(&directory.id, user_id).await?;
        let mut data = serde_json::to_value(group).unwrap_or_default();
        if let Some(map) = data.as_object_mut() {
            map.insert(
                "member".into(),
                user.map(|u| serde_json::to_value(&u).unwrap_or_default())
                    .unwrap_or_else(|| json!({ "id": user_id })),
            );
        }
        self.emit(directory, event, data).await;
        Ok(())
    }

    /// Group raw payload with a live `members` array resolved from the
    /// membership relation.
    async fn with_members(
        &self,
        directory: &Directory,
        group: DirectoryGroup,
    ) -> gatehouse_core::Result<Value> {
        let members = self.groups.get_members(&directory.id, &group.id).await?;
        let mut raw = group.raw;
        if let Some(map) = raw.as_object_mut() {
            let members: Vec<Value> = members
                .iter()
                .map(|m| json!({ "value": m.user_id }))
                .collect();
            map.insert("members".into(), Value::Array(members));
        } else {
            let mut map = Map::new();
            map.insert("id".into(), json!(group.id));
            raw = Value::Object(map);
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::{CreateDirectoryParams, NAMESPACE as DIR_NAMESPACE};
    use crate::event_log::{WebhookEventsLogger, NAMESPACE as LOG_NAMESPACE};
    use crate::events::WebhookTransport;
    use crate::groups::{MEMBERS_NAMESPACE, NAMESPACE as GROUPS_NAMESPACE};
    use crate::users::NAMESPACE as USERS_NAMESPACE;
    use async_trait::async_trait;
    use gatehouse_core::{DirectoryType, Result};
    use gatehouse_store::{MemoryDriver, Store};
    use std::sync::{Arc, Mutex};

    struct RecordingTransport {
        status: u16,
        events: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl WebhookTransport for RecordingTransport {
        async fn deliver(&self, _endpoint: &str, _signature: &str, body: &str) -> Result<u16> {
            self.events
                .lock()
                .unwrap()
                .push(serde_json::from_str(body).unwrap());
            Ok(self.status)
        }
    }

    async fn fixture(status: u16) -> (DirectorySync, Directory, Arc<RecordingTransport>) {
        let driver = Arc::new(MemoryDriver::new());
        let directories = DirectoryController::new(
            Store::new(driver.clone(), DIR_NAMESPACE, None, None),
            "https://broker.example.com".into(),
        );
        let users = Users::new(Store::new(driver.clone(), USERS_NAMESPACE, None, None));
        let groups = Groups::new(
            Store::new(driver.clone(), GROUPS_NAMESPACE, None, None),
            Store::new(driver.clone(), MEMBERS_NAMESPACE, None, None),
        );
        let transport = Arc::new(RecordingTransport {
            status,
            events: Mutex::new(Vec::new()),
        });
        let logger =
            WebhookEventsLogger::new(Store::new(driver, LOG_NAMESPACE, None, None));
        let dispatcher = EventDispatcher::new(transport.clone(), logger);

        let directory = directories
            .create(CreateDirectoryParams {
                tenant: "acme".into(),
                product: "app1".into(),
                name: None,
                directory_type: DirectoryType::OktaScimV2,
                webhook_url: Some("https://app1.acme.com/events".into()),
                webhook_secret: None,
                log_webhook_events: true,
            })
            .await
            .unwrap();

        (
            DirectorySync::new(directories, users, groups, dispatcher),
            directory,
            transport,
        )
    }

    fn user_body(user_name: &str) -> Value {
        json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
            "userName": user_name,
            "name": { "givenName": "Jack", "familyName": "Son" },
            "emails": [{ "primary": true, "value": format!("{user_name}@acme.com") }],
            "active": true,
        })
    }

    fn event_names(transport: &RecordingTransport) -> Vec<String> {
        transport
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e["event"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_create_user_emits_user_created() {
        let (sync, directory, transport) = fixture(200).await;
        let response = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Post, ScimResource::Users)
                    .with_body(user_body("jdoe")),
            )
            .await;

        assert_eq!(response.status, 201);
        let id = response.body["id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());
        assert_eq!(event_names(&transport), vec!["user.created"]);

        let stored = sync.users().get(&directory.id, &id).await.unwrap().unwrap();
        assert_eq!(stored.email, "jdoe@acme.com");
        assert_eq!(stored.first_name, "Jack");
    }

    #[tokio::test]
    async fn test_webhook_500_still_returns_201() {
        let (sync, directory, _) = fixture(500).await;
        let response = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Post, ScimResource::Users)
                    .with_body(user_body("jdoe")),
            )
            .await;
        assert_eq!(response.status, 201);

        let (entries, _) = sync
            .dispatcher()
            .logger()
            .get_all(&directory.id, 0, 0)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status_code, Some(500));
        assert!(!entries[0].delivered);
    }

    #[tokio::test]
    async fn test_filter_user_name_eq() {
        let (sync, directory, _) = fixture(200).await;
        sync.handle_request(
            &directory,
            ScimRequest::new(ScimMethod::Post, ScimResource::Users)
                .with_body(user_body("jdoe")),
        )
        .await;

        let response = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Get, ScimResource::Users)
                    .with_filter(r#"userName eq "jdoe""#),
            )
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body["totalResults"], 1);
        assert_eq!(response.body["Resources"][0]["userName"], "jdoe");

        let empty = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Get, ScimResource::Users)
                    .with_filter(r#"userName eq "nobody""#),
            )
            .await;
        assert_eq!(empty.body["totalResults"], 0);
    }

    #[tokio::test]
    async fn test_patch_deactivate_is_a_tombstone() {
        let (sync, directory, transport) = fixture(200).await;
        let created = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Post, ScimResource::Users)
                    .with_body(user_body("jdoe")),
            )
            .await;
        let id = created.body["id"].as_str().unwrap().to_string();

        let response = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Patch, ScimResource::Users)
                    .with_id(&id)
                    .with_body(json!({
                        "Operations": [{ "op": "replace", "value": { "active": false } }]
                    })),
            )
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(
            event_names(&transport),
            vec!["user.created", "user.deleted"]
        );

        // Tombstone: the record survives with active=false
        let stored = sync.users().get(&directory.id, &id).await.unwrap().unwrap();
        assert!(!stored.active);
    }

    #[tokio::test]
    async fn test_patch_replace_updates_fields() {
        let (sync, directory, transport) = fixture(200).await;
        let created = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Post, ScimResource::Users)
                    .with_body(user_body("jdoe")),
            )
            .await;
        let id = created.body["id"].as_str().unwrap().to_string();

        let response = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Patch, ScimResource::Users)
                    .with_id(&id)
                    .with_body(json!({
                        "Operations": [{
                            "op": "replace",
                            "path": "name.givenName",
                            "value": "Jill"
                        }]
                    })),
            )
            .await;
        assert_eq!(response.body["name"]["givenName"], "Jill");
        assert_eq!(
            event_names(&transport),
            vec!["user.created", "user.updated"]
        );
    }

    #[tokio::test]
    async fn test_delete_user_emits_user_deleted() {
        let (sync, directory, transport) = fixture(200).await;
        let created = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Post, ScimResource::Users)
                    .with_body(user_body("jdoe")),
            )
            .await;
        let id = created.body["id"].as_str().unwrap().to_string();

        let response = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Delete, ScimResource::Users).with_id(&id),
            )
            .await;
        assert_eq!(response.status, 200);
        assert!(sync.users().get(&directory.id, &id).await.unwrap().is_none());
        assert_eq!(
            event_names(&transport),
            vec!["user.created", "user.deleted"]
        );
    }

    #[tokio::test]
    async fn test_get_missing_user_is_scim_error() {
        let (sync, directory, _) = fixture(200).await;
        let response = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Get, ScimResource::Users).with_id("nope"),
            )
            .await;
        assert_eq!(response.status, 404);
        assert_eq!(response.body["schemas"][0], ERROR_SCHEMA);
        assert_eq!(response.body["detail"], "User not found");
        assert_eq!(response.body["status"], 404);
    }

    #[tokio::test]
    async fn test_group_lifecycle_with_membership_events() {
        let (sync, directory, transport) = fixture(200).await;
        let user = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Post, ScimResource::Users)
                    .with_body(user_body("jdoe")),
            )
            .await;
        let user_id = user.body["id"].as_str().unwrap().to_string();

        let group = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Post, ScimResource::Groups).with_body(json!({
                    "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
                    "displayName": "Engineering",
                })),
            )
            .await;
        assert_eq!(group.status, 201);
        let group_id = group.body["id"].as_str().unwrap().to_string();

        sync.handle_request(
            &directory,
            ScimRequest::new(ScimMethod::Patch, ScimResource::Groups)
                .with_id(&group_id)
                .with_body(json!({
                    "Operations": [{
                        "op": "add",
                        "path": "members",
                        "value": [{ "value": user_id }]
                    }]
                })),
        )
        .await;
        assert!(sync
            .groups()
            .is_member(&directory.id, &group_id, &user_id)
            .await
            .unwrap());

        sync.handle_request(
            &directory,
            ScimRequest::new(ScimMethod::Patch, ScimResource::Groups)
                .with_id(&group_id)
                .with_body(json!({
                    "Operations": [{
                        "op": "remove",
                        "path": format!("members[value eq \"{user_id}\"]"),
                    }]
                })),
        )
        .await;
        assert!(!sync
            .groups()
            .is_member(&directory.id, &group_id, &user_id)
            .await
            .unwrap());

        sync.handle_request(
            &directory,
            ScimRequest::new(ScimMethod::Delete, ScimResource::Groups).with_id(&group_id),
        )
        .await;

        assert_eq!(
            event_names(&transport),
            vec![
                "user.created",
                "group.created",
                "group.user_added",
                "group.user_removed",
                "group.deleted",
            ]
        );
    }

    #[tokio::test]
    async fn test_group_display_name_filter() {
        let (sync, directory, _) = fixture(200).await;
        sync.handle_request(
            &directory,
            ScimRequest::new(ScimMethod::Post, ScimResource::Groups)
                .with_body(json!({ "displayName": "Engineering" })),
        )
        .await;

        let response = sync
            .handle_request(
                &directory,
                ScimRequest::new(ScimMethod::Get, ScimResource::Groups)
                    .with_filter(r#"displayName eq "Engineering""#),
            )
            .await;
        assert_eq!(response.body["totalResults"], 1);
        assert_eq!(response.body["Resources"][0]["displayName"], "Engineering");
    }
}
