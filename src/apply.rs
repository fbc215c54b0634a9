//! Applies appended operations to in-memory live state.
//!
//! `LiveState` is the usual consumer of the log's appended callback. It keeps
//! the routables and pipelines currently in effect and reports why an
//! operation cannot be applied, which the log turns into a cluster error.
//!
//! A callback runs before its batch commits, so an operation applied through
//! it stays pending until `replay` finds the same operation committed at the
//! same sequence. `applied_seq` only covers confirmed sequences.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::callback::Priority;
use crate::error::{OpLogError, OperationFailure};
use crate::operation::{Operation, OperationContent, PipelineSpec, RoutableSpec};
use crate::oplog::OpLog;
use crate::registry::ObjectRegistry;
use crate::store::KvStore;

pub const CALLBACK_NAME: &str = "liveState";

#[derive(Default)]
struct Objects {
    routables: BTreeMap<String, RoutableSpec>,
    pipelines: BTreeMap<String, PipelineSpec>,
    // applied through the callback, not yet matched against the log
    pending: BTreeMap<u64, Operation>,
    applied_seq: u64,
}

pub struct LiveState {
    registry: ObjectRegistry,
    objects: RwLock<Objects>,
}

impl LiveState {
    pub fn new(registry: ObjectRegistry) -> Arc<Self> {
        Arc::new(Self {
            registry,
            objects: RwLock::new(Objects::default()),
        })
    }

    /// Register this state on `oplog` so every appended operation is applied.
    pub fn attach<S: KvStore>(self: &Arc<Self>, oplog: &OpLog<S>, priority: Priority) {
        let state = self.clone();
        oplog.add_appended_callback(
            CALLBACK_NAME,
            move |seq, operation| state.apply(seq, operation),
            priority,
        );
    }

    pub fn detach<S: KvStore>(oplog: &OpLog<S>) {
        oplog.remove_appended_callback(CALLBACK_NAME);
    }

    /// Apply every committed operation after `applied_seq`, `page` at a time.
    /// Returns the sequence applied up to.
    pub fn replay<S: KvStore>(&self, oplog: &OpLog<S>, page: u64) -> Result<u64, OpLogError> {
        let page = page.max(1);
        let mut next = self.applied_seq() + 1;

        loop {
            let operations = oplog.retrieve(next, page)?;
            if operations.is_empty() {
                break;
            }

            for operation in operations.iter() {
                let mut objects = self.objects.write();

                if objects.pending.remove(&next).as_ref() == Some(operation) {
                    debug!("operation (sequence={next}) already applied");
                } else if let Err(failure) = self.apply_content(&mut objects, operation) {
                    // committed history is authoritative, keep going
                    warn!("replay operation (sequence={next}) failed, failure: {failure}");
                }

                objects.pending.retain(|seq, _| *seq > next);
                objects.applied_seq = next;
                next += 1;
            }
        }

        let applied = self.applied_seq();
        info!("replayed operation log up to sequence {applied}");
        Ok(applied)
    }

    /// Apply an operation staged at `seq`. It counts as applied only once
    /// `replay` sees it committed.
    pub fn apply(&self, seq: u64, operation: &Operation) -> Result<(), OperationFailure> {
        let mut objects = self.objects.write();
        self.apply_content(&mut objects, operation)?;
        objects.pending.insert(seq, operation.clone());

        debug!("applied operation (sequence={seq})");
        Ok(())
    }

    fn apply_content(
        &self,
        objects: &mut Objects,
        operation: &Operation,
    ) -> Result<(), OperationFailure> {
        let content = operation
            .content()
            .map_err(|e| OperationFailure::not_acceptable(e.to_string()))?;

        match content {
            OperationContent::CreateRoutable(spec) => {
                if objects.routables.contains_key(&spec.name) {
                    return Err(OperationFailure::conflict(format!(
                        "routable {} exists",
                        spec.name
                    )));
                }
                self.check_routable(spec)?;
                objects.routables.insert(spec.name.clone(), spec.clone());
            }
            OperationContent::UpdateRoutable(spec) => {
                if !objects.routables.contains_key(&spec.name) {
                    return Err(OperationFailure::target_not_found(format!(
                        "routable {} not found",
                        spec.name
                    )));
                }
                self.check_routable(spec)?;
                objects.routables.insert(spec.name.clone(), spec.clone());
            }
            OperationContent::DeleteRoutable(name) => {
                if !objects.routables.contains_key(name) {
                    return Err(OperationFailure::target_not_found(format!(
                        "routable {name} not found"
                    )));
                }
                if let Some(p) = objects
                    .pipelines
                    .values()
                    .find(|p| p.routables.iter().any(|r| r == name))
                {
                    return Err(OperationFailure::conflict(format!(
                        "routable {name} is used by pipeline {}",
                        p.name
                    )));
                }
                objects.routables.remove(name);
            }
            OperationContent::CreatePipeline(spec) => {
                if objects.pipelines.contains_key(&spec.name) {
                    return Err(OperationFailure::conflict(format!(
                        "pipeline {} exists",
                        spec.name
                    )));
                }
                self.check_pipeline(objects, spec)?;
                objects.pipelines.insert(spec.name.clone(), spec.clone());
            }
            OperationContent::UpdatePipeline(spec) => {
                if !objects.pipelines.contains_key(&spec.name) {
                    return Err(OperationFailure::target_not_found(format!(
                        "pipeline {} not found",
                        spec.name
                    )));
                }
                self.check_pipeline(objects, spec)?;
                objects.pipelines.insert(spec.name.clone(), spec.clone());
            }
            OperationContent::DeletePipeline(name) => {
                if objects.pipelines.remove(name).is_none() {
                    return Err(OperationFailure::target_not_found(format!(
                        "pipeline {name} not found"
                    )));
                }
            }
        }

        debug!("apply {content}");
        Ok(())
    }

    fn check_routable(&self, spec: &RoutableSpec) -> Result<(), OperationFailure> {
        if spec.name.is_empty() {
            return Err(OperationFailure::not_acceptable("routable name is empty"));
        }

        self.registry
            .validate(&spec.kind, &spec.config)
            .map_err(|e| OperationFailure::not_acceptable(e.to_string()))
    }

    fn check_pipeline(&self, objects: &Objects, spec: &PipelineSpec) -> Result<(), OperationFailure> {
        if spec.name.is_empty() {
            return Err(OperationFailure::not_acceptable("pipeline name is empty"));
        }

        self.registry
            .validate(&spec.kind, &spec.config)
            .map_err(|e| OperationFailure::not_acceptable(e.to_string()))?;

        if let Some(missing) = spec
            .routables
            .iter()
            .find(|r| !objects.routables.contains_key(*r))
        {
            return Err(OperationFailure::not_acceptable(format!(
                "pipeline {} references unknown routable {missing}",
                spec.name
            )));
        }

        Ok(())
    }

    pub fn routable(&self, name: &str) -> Option<RoutableSpec> {
        self.objects.read().routables.get(name).cloned()
    }

    pub fn pipeline(&self, name: &str) -> Option<PipelineSpec> {
        self.objects.read().pipelines.get(name).cloned()
    }

    pub fn routable_names(&self) -> Vec<String> {
        self.objects.read().routables.keys().cloned().collect()
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.objects.read().pipelines.keys().cloned().collect()
    }

    pub fn applied_seq(&self) -> u64 {
        self.objects.read().applied_seq
    }
}
