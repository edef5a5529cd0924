//! Intent compiler: intent + registry to a content-addressed plan.

use serde::Serialize;
use serde_json::{Value, json};

use crate::canonical::{canonical_json_string, sha3_512_tagged, to_canonical_value};
use crate::error::EglError;
use crate::intent::{ActionBody, Intent, IntentMeta};
use crate::refusal::Refusal;
use crate::registry::ToolSurfaceRegistry;

pub const PLAN_SCHEMA_ID: &str = "EGL.PLAN";
pub const PLAN_VERSION: &str = "0.1.0";
pub const COMPILATION_SCHEMA_ID: &str = "EGL.INTENT_COMPILATION";

/// Default plan id when the intent carries none.
const DEFAULT_PLAN_ID: &str = "PLAN";

/// One action as it will run: no action id, only the kind payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanAction {
    pub tool_surface_id: String,
    #[serde(flatten)]
    pub body: ActionBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub schema_id: String,
    pub version: String,
    pub plan_id: String,
    pub actions: Vec<PlanAction>,
}

impl Plan {
    pub fn to_value(&self) -> Result<Value, EglError> {
        to_canonical_value(self)
    }

    pub fn canonical(&self) -> Result<String, EglError> {
        Ok(canonical_json_string(&self.to_value()?))
    }

    pub fn hash(&self) -> Result<String, EglError> {
        Ok(sha3_512_tagged(&self.to_value()?))
    }

    pub fn first_action(&self) -> Option<&PlanAction> {
        self.actions.first()
    }

    pub fn touches_surface(&self, surface_id: &str) -> bool {
        self.actions.iter().any(|a| a.tool_surface_id == surface_id)
    }
}

/// A successfully compiled intent.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub plan: Plan,
    pub intent_hash: String,
    pub plan_hash: String,
    pub meta: IntentMeta,
}

impl CompiledPlan {
    /// The `EGL.INTENT_COMPILATION` record.
    pub fn record(&self) -> Result<Value, EglError> {
        Ok(json!({
            "schema_id": COMPILATION_SCHEMA_ID,
            "version": PLAN_VERSION,
            "status": "OK",
            "meta": to_canonical_value(&self.meta)?,
            "plan": self.plan.to_value()?,
            "hashes": {
                "intent": self.intent_hash,
                "plan": self.plan_hash,
            },
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Compilation {
    Compiled(CompiledPlan),
    Refused(Refusal),
}

impl Compilation {
    pub fn intent_hash(&self) -> Option<&str> {
        match self {
            Compilation::Compiled(c) => Some(&c.intent_hash),
            Compilation::Refused(r) => r.hashes.intent.as_deref(),
        }
    }

    pub fn plan_hash(&self) -> Option<&str> {
        match self {
            Compilation::Compiled(c) => Some(&c.plan_hash),
            Compilation::Refused(_) => None,
        }
    }

    pub fn plan(&self) -> Option<&Plan> {
        match self {
            Compilation::Compiled(c) => Some(&c.plan),
            Compilation::Refused(_) => None,
        }
    }

    pub fn compiled(&self) -> Option<&CompiledPlan> {
        match self {
            Compilation::Compiled(c) => Some(c),
            Compilation::Refused(_) => None,
        }
    }

    /// The compilation record, or the refusal itself.
    pub fn record(&self) -> Result<Value, EglError> {
        match self {
            Compilation::Compiled(c) => c.record(),
            Compilation::Refused(r) => to_canonical_value(r),
        }
    }
}

/// Compile an intent against a registry.
///
/// Actions are ordered by `action_id`. The first action whose surface is
/// unmapped refuses the whole intent; an empty registry refuses on the
/// first ordered action (or `UNKNOWN` when there is none).
pub fn compile(intent: &Intent, registry: &ToolSurfaceRegistry) -> Result<Compilation, EglError> {
    let intent_hash = intent.hash();

    let mut ordered: Vec<_> = intent.actions.iter().collect();
    ordered.sort_by(|a, b| a.action_id.cmp(&b.action_id));

    if registry.is_empty() {
        let surface_id = ordered
            .first()
            .map(|a| a.tool_surface_id.as_str())
            .unwrap_or("UNKNOWN");
        tracing::debug!(surface_id, "compile refused: empty tool surface registry");
        return Ok(Compilation::Refused(Refusal::unmapped(surface_id, &intent_hash)));
    }

    if let Some(unmapped) = ordered.iter().find(|a| !registry.is_mapped(&a.tool_surface_id)) {
        tracing::debug!(
            surface_id = %unmapped.tool_surface_id,
            "compile refused: unmapped tool surface"
        );
        return Ok(Compilation::Refused(Refusal::unmapped(
            &unmapped.tool_surface_id,
            &intent_hash,
        )));
    }

    let plan = Plan {
        schema_id: PLAN_SCHEMA_ID.to_string(),
        version: PLAN_VERSION.to_string(),
        plan_id: intent
            .intent_id
            .clone()
            .unwrap_or_else(|| DEFAULT_PLAN_ID.to_string()),
        actions: ordered
            .into_iter()
            .map(|a| PlanAction {
                tool_surface_id: a.tool_surface_id.clone(),
                body: a.body.clone(),
            })
            .collect(),
    };
    let plan_hash = plan.hash()?;

    Ok(Compilation::Compiled(CompiledPlan {
        plan,
        intent_hash,
        plan_hash,
        meta: intent.meta.clone(),
    }))
}
