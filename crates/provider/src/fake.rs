//! Scripted in-process provider for tests and local runs.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use dialsync_core::domain::call::CallDetails;
use dialsync_core::domain::resource::{RemoteId, RemoteObject, ResourceKind};
use dialsync_core::errors::ProviderError;
use dialsync_core::normalize::name_key;

use crate::{RemoteCall, RemoteProvider};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FakeOp {
    CreateResource,
    UpdateResource,
    DeleteResource,
    FetchResource,
    FindResource,
    CreateCall,
    FetchCall,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<String, (ResourceKind, RemoteObject)>,
    call_details: HashMap<String, CallDetails>,
    queued_failures: HashMap<FakeOp, VecDeque<ProviderError>>,
    persistent_failures: HashMap<FakeOp, ProviderError>,
    calls: HashMap<FakeOp, u32>,
    payloads: HashMap<FakeOp, Vec<Value>>,
    next_id: u64,
}

impl FakeState {
    fn record(&mut self, op: FakeOp, payload: Option<&Value>) -> Result<(), ProviderError> {
        *self.calls.entry(op).or_insert(0) += 1;
        if let Some(payload) = payload {
            self.payloads.entry(op).or_default().push(payload.clone());
        }
        if let Some(error) = self.queued_failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        match self.persistent_failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self, prefix: &str) -> RemoteId {
        self.next_id += 1;
        RemoteId(format!("{prefix}-{}", self.next_id))
    }
}

pub struct FakeProvider {
    name: String,
    state: Mutex<FakeState>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new("fake")
    }
}

impl FakeProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: Mutex::new(FakeState::default()) }
    }

    /// The next `op` fails with `error`; later calls behave normally.
    pub async fn fail_next(&self, op: FakeOp, error: ProviderError) {
        self.state.lock().await.queued_failures.entry(op).or_default().push_back(error);
    }

    /// Every `op` fails with `error` until [`FakeProvider::clear_failures`].
    pub async fn fail_always(&self, op: FakeOp, error: ProviderError) {
        self.state.lock().await.persistent_failures.insert(op, error);
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.queued_failures.clear();
        state.persistent_failures.clear();
    }

    pub async fn calls(&self, op: FakeOp) -> u32 {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn payloads(&self, op: FakeOp) -> Vec<Value> {
        self.state.lock().await.payloads.get(&op).cloned().unwrap_or_default()
    }

    pub async fn object(&self, remote_id: &RemoteId) -> Option<RemoteObject> {
        self.state.lock().await.objects.get(&remote_id.0).map(|(_, object)| object.clone())
    }

    pub async fn object_count(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    /// Seeds or replaces a remote object, e.g. to simulate out-of-band edits.
    pub async fn put_object(&self, kind: ResourceKind, object: RemoteObject) {
        self.state.lock().await.objects.insert(object.remote_id.0.clone(), (kind, object));
    }

    pub async fn remove_object(&self, remote_id: &RemoteId) -> bool {
        self.state.lock().await.objects.remove(&remote_id.0).is_some()
    }

    pub async fn set_call_details(&self, remote_call_id: &RemoteId, details: CallDetails) {
        self.state.lock().await.call_details.insert(remote_call_id.0.clone(), details);
    }
}

#[async_trait]
impl RemoteProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        payload: &Value,
    ) -> Result<RemoteObject, ProviderError> {
        let mut state = self.state.lock().await;
        state.record(FakeOp::CreateResource, Some(payload))?;

        let object = RemoteObject {
            remote_id: state.allocate_id(&format!("r{}", kind.as_str())),
            status: Some("ready".to_string()),
            name: payload.get("name").and_then(Value::as_str).map(str::to_string),
            data: payload.clone(),
        };
        state.objects.insert(object.remote_id.0.clone(), (kind, object.clone()));
        Ok(object)
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        remote_id: &RemoteId,
        payload: &Value,
    ) -> Result<RemoteObject, ProviderError> {
        let mut state = self.state.lock().await;
        state.record(FakeOp::UpdateResource, Some(payload))?;

        let Some((stored_kind, existing)) = state.objects.get_mut(&remote_id.0) else {
            return Err(ProviderError::from_status(&self.name, 404, None, Value::Null));
        };
        if *stored_kind != kind {
            return Err(ProviderError::from_status(&self.name, 404, None, Value::Null));
        }
        existing.name = payload.get("name").and_then(Value::as_str).map(str::to_string);
        existing.data = payload.clone();
        Ok(existing.clone())
    }

    async fn delete_resource(
        &self,
        _kind: ResourceKind,
        remote_id: &RemoteId,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state.record(FakeOp::DeleteResource, None)?;
        state.objects.remove(&remote_id.0);
        Ok(())
    }

    async fn fetch_resource(
        &self,
        kind: ResourceKind,
        remote_id: &RemoteId,
    ) -> Result<Option<RemoteObject>, ProviderError> {
        let mut state = self.state.lock().await;
        state.record(FakeOp::FetchResource, None)?;
        Ok(state
            .objects
            .get(&remote_id.0)
            .filter(|(stored_kind, _)| *stored_kind == kind)
            .map(|(_, object)| object.clone()))
    }

    async fn find_resources(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Vec<RemoteObject>, ProviderError> {
        let mut state = self.state.lock().await;
        state.record(FakeOp::FindResource, None)?;
        let wanted = name_key(name);
        Ok(state
            .objects
            .values()
            .filter(|(stored_kind, _)| *stored_kind == kind)
            .map(|(_, object)| object)
            .filter(|object| object.name.as_deref().map(name_key).as_deref() == Some(wanted.as_str()))
            .cloned()
            .collect())
    }

    async fn create_call(&self, payload: &Value) -> Result<RemoteCall, ProviderError> {
        let mut state = self.state.lock().await;
        state.record(FakeOp::CreateCall, Some(payload))?;
        Ok(RemoteCall {
            remote_call_id: state.allocate_id("c"),
            status: Some("queued".to_string()),
        })
    }

    async fn fetch_call(
        &self,
        remote_call_id: &RemoteId,
    ) -> Result<Option<CallDetails>, ProviderError> {
        let mut state = self.state.lock().await;
        state.record(FakeOp::FetchCall, None)?;
        Ok(state.call_details.get(&remote_call_id.0).cloned())
    }
}
