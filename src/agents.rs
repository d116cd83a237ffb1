//! Agent registry: one independent knowledge base per known agent.
//!
//! The registry watches the host knowledge base for new instances of the
//! agent class and gives each one its own model of the world. The robot's
//! own model is always present under `myself`, also reachable as `default`.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::KnowledgeConfig;
use crate::engine::KnowledgeBase;
use crate::error::{KbError, KbResult};
use crate::memory::MemoryProfile;
use crate::term::{Namespaces, Term, Triple, OWL_CLASS, RDF_TYPE};
use crate::watch::{EventKind, WatchEvent, WatchPattern, WatcherId};

/// Id of the robot's own model.
pub const MYSELF: &str = "myself";
const DEFAULT_ALIAS: &str = "default";

fn lock_err(context: &'static str) -> KbError {
    KbError::internal(format!("poisoned lock: {context}"))
}

/// How [`AgentRegistry::revise`] applies statements to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionPolicy {
    /// Add with the given memory profile.
    #[default]
    Add,
    /// Add, refusing statements that would make the model inconsistent.
    SafeAdd,
    /// Remove the statements.
    Retract,
    /// Add permanently, replacing values of functional properties.
    Update,
}

/// Models of the robot and of the agents it knows about.
pub struct AgentRegistry {
    config: KnowledgeConfig,
    models: RwLock<BTreeMap<String, Arc<KnowledgeBase>>>,
    watcher_id: OnceLock<WatcherId>,
}

impl AgentRegistry {
    /// Creates the registry and starts tracking agents of `host`.
    ///
    /// Agents already present in `host` get a model immediately. The agent
    /// class is declared on `host` if it does not know it yet.
    pub fn attach(host: &KnowledgeBase, config: KnowledgeConfig) -> KbResult<Arc<Self>> {
        config.validate()?;
        let ns = host.namespaces().clone();
        let class = ns.qualify(config.agents.agent_class.trim());

        if let Err(e) = host.instances_of(&class) {
            if !e.is_not_found() {
                return Err(e);
            }
            debug!(class = %class, "agent class unknown, declaring it");
            host.assert(
                &Triple::new(class.as_str(), RDF_TYPE, Term::resource(OWL_CLASS)),
                MemoryProfile::Permanent,
                false,
            )?;
        }

        let myself = Arc::new(KnowledgeBase::new(config.clone())?);
        let registry = Arc::new(Self {
            models: RwLock::new(BTreeMap::from([(MYSELF.to_string(), myself)])),
            config,
            watcher_id: OnceLock::new(),
        });

        let weak = Arc::downgrade(&registry);
        let watcher_id = host.register_watcher(
            &WatchPattern::new_instance_of(class.as_str()),
            Arc::new(move |event: &WatchEvent| {
                if event.kind != EventKind::NewInstances {
                    return;
                }
                let Some(registry) = weak.upgrade() else {
                    return;
                };
                for id in &event.matched {
                    if let Err(e) = registry.add_agent(id) {
                        warn!(agent = %id, error = %e, "failed to create agent model");
                    }
                }
            }),
        )?;
        let _ = registry.watcher_id.set(watcher_id);

        // Seeded after registration: agents asserted in between are either
        // reported by the watcher or already visible here.
        let mut existing: Vec<String> = host.instances_of(&class)?.into_iter().collect();
        existing.sort();
        for id in &existing {
            registry.add_agent(id)?;
        }

        info!(class = %Namespaces::local_name(&class), agents = registry.len(), "agent registry attached");
        Ok(registry)
    }

    /// Id of the watcher registered on the host. Unregister it there to
    /// stop tracking new agents.
    #[must_use]
    pub fn watcher_id(&self) -> Option<WatcherId> {
        self.watcher_id.get().copied()
    }

    fn canonical(id: &str) -> &str {
        let id = id.trim();
        if id == DEFAULT_ALIAS {
            MYSELF
        } else {
            id
        }
    }

    /// Creates a model for `id` unless one exists. Returns false when the
    /// agent was already tracked or the registry is full.
    pub fn add_agent(&self, id: &str) -> KbResult<bool> {
        let id = Self::canonical(id);
        if id.is_empty() {
            return Err(KbError::malformed(id, "empty agent id"));
        }
        let mut models = self.models.write().map_err(|_| lock_err("agents.models"))?;
        if models.contains_key(id) {
            return Ok(false);
        }
        if models.len() >= self.config.agents.max_agents {
            warn!(agent = %id, max_agents = self.config.agents.max_agents, "agent refused: registry full");
            return Ok(false);
        }
        models.insert(id.to_string(), Arc::new(KnowledgeBase::new(self.config.clone())?));
        info!(agent = %id, "agent model created");
        Ok(true)
    }

    /// Tracked agent ids, `myself` included, sorted.
    pub fn list_agents(&self) -> KbResult<Vec<String>> {
        let models = self.models.read().map_err(|_| lock_err("agents.models"))?;
        Ok(models.keys().cloned().collect())
    }

    /// The model of an agent. `default` names the robot's own model.
    ///
    /// # Errors
    /// `NotFound` for an agent that is not tracked.
    pub fn model_for(&self, id: &str) -> KbResult<Arc<KnowledgeBase>> {
        let id = Self::canonical(id);
        let models = self.models.read().map_err(|_| lock_err("agents.models"))?;
        models
            .get(id)
            .cloned()
            .ok_or_else(|| KbError::not_found("agent", id))
    }

    /// The robot's own model.
    pub fn myself(&self) -> KbResult<Arc<KnowledgeBase>> {
        self.model_for(MYSELF)
    }

    /// Number of models, `myself` included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.read().map(|m| m.len()).unwrap_or_default()
    }

    /// Never true once attached: `myself` is always there.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies statements to every model, or to the named agents only.
    ///
    /// Unknown agents in `agents` fail the call before any model changes.
    /// Returns false if a `SafeAdd` refused a statement in some model.
    pub fn revise<S: AsRef<str>>(
        &self,
        statements: &[S],
        policy: RevisionPolicy,
        profile: MemoryProfile,
        agents: Option<&[&str]>,
    ) -> KbResult<bool> {
        let targets: Vec<Arc<KnowledgeBase>> = match agents {
            Some(ids) => ids.iter().map(|id| self.model_for(id)).collect::<KbResult<_>>()?,
            None => {
                let models = self.models.read().map_err(|_| lock_err("agents.models"))?;
                models.values().cloned().collect()
            }
        };
        let facts = {
            let ns = self.config.namespaces();
            statements
                .iter()
                .map(|s| ns.parse_statement(s.as_ref()))
                .collect::<KbResult<Vec<Triple>>>()?
        };

        let mut accepted = true;
        for model in &targets {
            match policy {
                RevisionPolicy::Add => {
                    model.assert_many(&facts, profile, false)?;
                }
                RevisionPolicy::SafeAdd => accepted &= model.assert_many(&facts, profile, true)?,
                RevisionPolicy::Retract => {
                    model.retract_many(&facts)?;
                }
                RevisionPolicy::Update => model.update(&facts)?,
            }
        }
        debug!(?policy, statements = facts.len(), models = targets.len(), "revise");
        Ok(accepted)
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.list_agents().ok())
            .field("watcher_id", &self.watcher_id())
            .finish()
    }
}
