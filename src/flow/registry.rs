//! Registry of validated flow definitions.
//!
//! Built mutably during startup, then published behind an `Arc` and only read
//! afterwards, so lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{InvalidFlowError, NotFoundError};

use super::defaults;
use super::definition::{FlowConfig, FlowDefinition};

/// Short description of a registered flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    pub flow_id: String,
    pub name: String,
    pub description: String,
}

impl From<&FlowDefinition> for FlowSummary {
    fn from(def: &FlowDefinition) -> Self {
        Self {
            flow_id: def.flow_id().to_string(),
            name: def.name().to_string(),
            description: def.description().to_string(),
        }
    }
}

/// Flow definitions by id.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: HashMap<String, Arc<FlowDefinition>>,
}

impl FlowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry preloaded with the built-in flows.
    pub fn with_defaults() -> Result<Self, InvalidFlowError> {
        let mut registry = Self::new();
        for config in defaults::default_flows() {
            registry.register_config(config)?;
        }
        Ok(registry)
    }

    /// Register a validated definition. Rejects a flow id that is already taken.
    pub fn register(
        &mut self,
        definition: FlowDefinition,
    ) -> Result<Arc<FlowDefinition>, InvalidFlowError> {
        let flow_id = definition.flow_id().to_string();
        if self.flows.contains_key(&flow_id) {
            return Err(InvalidFlowError::DuplicateFlow { flow_id });
        }
        let definition = Arc::new(definition);
        self.flows.insert(flow_id.clone(), Arc::clone(&definition));
        tracing::debug!(
            flow_id = %flow_id,
            stages = definition.stage_count(),
            "Registered flow"
        );
        Ok(definition)
    }

    /// Validate a raw config and register it.
    pub fn register_config(
        &mut self,
        config: FlowConfig,
    ) -> Result<Arc<FlowDefinition>, InvalidFlowError> {
        self.register(FlowDefinition::from_config(config)?)
    }

    /// Get a flow by id.
    pub fn get(&self, flow_id: &str) -> Result<Arc<FlowDefinition>, NotFoundError> {
        self.flows
            .get(flow_id)
            .cloned()
            .ok_or_else(|| NotFoundError::Flow(flow_id.to_string()))
    }

    /// Check if a flow exists.
    pub fn contains(&self, flow_id: &str) -> bool {
        self.flows.contains_key(flow_id)
    }

    /// Summaries of all flows, sorted by id.
    pub fn list(&self) -> Vec<FlowSummary> {
        let mut summaries: Vec<FlowSummary> = self
            .flows
            .values()
            .map(|def| FlowSummary::from(def.as_ref()))
            .collect();
        summaries.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::definition::tests::{flow, stage};

    #[test]
    fn register_and_get() {
        let mut registry = FlowRegistry::new();
        registry
            .register_config(flow("f", "a", vec![stage("a", &[], 1)]))
            .unwrap();

        let def = registry.get("f").unwrap();
        assert_eq!(def.flow_id(), "f");
        assert!(registry.contains("f"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_flow_is_not_found() {
        let registry = FlowRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(
            registry.get("missing").unwrap_err(),
            NotFoundError::Flow("missing".to_string())
        );
    }

    #[test]
    fn duplicate_flow_rejected() {
        let mut registry = FlowRegistry::new();
        registry
            .register_config(flow("f", "a", vec![stage("a", &[], 1)]))
            .unwrap();
        let err = registry
            .register_config(flow("f", "b", vec![stage("b", &[], 1)]))
            .unwrap_err();
        assert_eq!(
            err,
            InvalidFlowError::DuplicateFlow {
                flow_id: "f".to_string()
            }
        );
        // The original registration is untouched
        assert_eq!(registry.get("f").unwrap().initial_stage_id(), "a");
    }

    #[test]
    fn invalid_config_never_registers() {
        let mut registry = FlowRegistry::new();
        let result = registry.register_config(flow("f", "a", vec![stage("a", &["zzz"], 1)]));
        assert!(matches!(
            result,
            Err(InvalidFlowError::DanglingNextStage { .. })
        ));
        assert!(!registry.contains("f"));
    }

    #[test]
    fn list_is_sorted() {
        let mut registry = FlowRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry
                .register_config(flow(id, "a", vec![stage("a", &[], 1)]))
                .unwrap();
        }
        let ids: Vec<String> = registry.list().into_iter().map(|s| s.flow_id).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn defaults_load() {
        let registry = FlowRegistry::with_defaults().unwrap();
        assert!(registry.contains("customer_support"));
        assert!(registry.contains("job_interview"));
    }
}
