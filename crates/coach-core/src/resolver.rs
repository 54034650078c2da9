//! Rule tree resolution.
//!
//! Rule trees are stored as self-referencing records (`parent`). For every
//! resolution the relevant records are loaded into an arena keyed by id plus
//! a parent -> ordered children index, and walked depth first.
//!
//! # Levels
//!
//! Siblings form else-if chains through their `level`: once a node at level
//! `L` does not match, following siblings with a level above `L` are skipped
//! until a sibling at level `L` or lower appears. Children of a node are only
//! visited when it matches.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    DialogMessage, MicroDialogRule, MonitoringMessage, MonitoringMessageGroup, MonitoringReplyRule,
    MonitoringRule, MonitoringRuleKind, Participant, ReplyBranch, RuleCondition,
};
use crate::rule_evaluator::{self, RuleEvaluation};
use crate::selector::MessageSelector;
use crate::store::queries::{MicroDialogRuleQuery, MonitoringReplyRuleQuery, MonitoringRuleQuery};
use crate::store::Store;
use crate::variables::{render_text, Snapshot, VariableStore};

// ---------------------------------------------------------------------------
// Cases and results
// ---------------------------------------------------------------------------

/// Which tree is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionCase {
    /// Root monitoring rules of one kind of the participant's intervention.
    Monitoring(MonitoringRuleKind),
    /// Reply rules of one monitoring rule for an answered or timed out message.
    Reply { monitoring_rule: Uuid, answered: bool },
    /// Rules of one micro-dialog decision point.
    DecisionPoint(Uuid),
}

/// Rule that produced a send task or activation.
#[derive(Debug, Clone)]
pub enum TaskOrigin {
    MonitoringRule(MonitoringRule),
    ReplyRule {
        rule: MonitoringReplyRule,
        monitoring_rule: MonitoringRule,
    },
}

impl TaskOrigin {
    pub fn send_to_supervisor(&self) -> bool {
        match self {
            TaskOrigin::MonitoringRule(r) => r.send_to_supervisor,
            TaskOrigin::ReplyRule { rule, .. } => rule.send_to_supervisor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendPayload {
    pub group: MonitoringMessageGroup,
    pub message: MonitoringMessage,
    /// Message text with variables rendered.
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct SendTask {
    pub origin: TaskOrigin,
    pub payload: SendPayload,
}

#[derive(Debug, Clone)]
pub struct Activation {
    pub origin: TaskOrigin,
    pub micro_dialog: Uuid,
}

/// What a decision point asks the walker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionDirective {
    JumpToMessage(Uuid),
    JumpToMicroDialog(Uuid),
    Stop,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub send_tasks: Vec<SendTask>,
    pub activations: Vec<Activation>,
    pub stop_intervention: bool,
    pub directive: Option<DecisionDirective>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.send_tasks.is_empty()
            && self.activations.is_empty()
            && !self.stop_intervention
            && self.directive.is_none()
    }
}

// ---------------------------------------------------------------------------
// Rule arena
// ---------------------------------------------------------------------------

pub trait RuleNode {
    fn id(&self) -> Uuid;
    fn parent(&self) -> Option<Uuid>;
    fn order(&self) -> i64;
    fn level(&self) -> u32;
    fn condition(&self) -> &RuleCondition;
    fn store_value_to_variable(&self) -> Option<&str>;
}

macro_rules! rule_node {
    ($($ty:ty),*) => {
        $(impl RuleNode for $ty {
            fn id(&self) -> Uuid { self.id }
            fn parent(&self) -> Option<Uuid> { self.parent }
            fn order(&self) -> i64 { self.order }
            fn level(&self) -> u32 { self.level }
            fn condition(&self) -> &RuleCondition { &self.condition }
            fn store_value_to_variable(&self) -> Option<&str> {
                self.store_value_to_variable.as_deref()
            }
        })*
    };
}

rule_node!(MonitoringRule, MonitoringReplyRule, MicroDialogRule);

/// Nodes keyed by id plus the ordered children of every parent. `None` keys
/// the roots.
pub struct RuleTree<N> {
    nodes: HashMap<Uuid, N>,
    children: HashMap<Option<Uuid>, Vec<Uuid>>,
}

impl<N: RuleNode> RuleTree<N> {
    /// Build the tree from `nodes`, keeping only roots accepted by `is_root`.
    pub fn build(nodes: Vec<N>, is_root: impl Fn(&N) -> bool) -> Self {
        let mut children: HashMap<Option<Uuid>, Vec<Uuid>> = HashMap::new();
        for node in nodes.iter() {
            if node.parent().is_none() && !is_root(node) {
                continue;
            }
            children.entry(node.parent()).or_default().push(node.id());
        }
        let nodes: HashMap<Uuid, N> = nodes.into_iter().map(|n| (n.id(), n)).collect();
        for ids in children.values_mut() {
            ids.sort_by_key(|id| nodes.get(id).map(|n| n.order()).unwrap_or(i64::MAX));
        }
        Self { nodes, children }
    }

    pub fn children(&self, parent: Option<Uuid>) -> impl Iterator<Item = &N> {
        self.children
            .get(&parent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves rule trees for one participant.
///
/// The variable snapshot is fetched lazily and dropped after every variable
/// write so later nodes observe the written values.
pub struct Resolver<'a> {
    store: &'a Store,
    variables: &'a dyn VariableStore,
    participant: &'a Participant,
    context: Option<&'a DialogMessage>,
    snapshot: Option<Snapshot>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        store: &'a Store,
        variables: &'a dyn VariableStore,
        participant: &'a Participant,
    ) -> Self {
        Self {
            store,
            variables,
            participant,
            context: None,
            snapshot: None,
        }
    }

    /// Message whose answer or timeout triggers the resolution.
    pub fn with_context(mut self, message: &'a DialogMessage) -> Self {
        self.context = Some(message);
        self
    }

    pub fn resolve(&mut self, case: ResolutionCase) -> Result<Resolution> {
        let mut out = Resolution::default();
        match case {
            ResolutionCase::Monitoring(kind) => {
                let rules: Vec<MonitoringRule> = self.store.find(&MonitoringRuleQuery::ByIntervention(
                    self.participant.intervention_id,
                ))?;
                let tree = RuleTree::build(rules, |r| r.kind == kind);
                self.walk(&tree, None, &mut out, &|this, rule, out| {
                    this.apply_monitoring_rule(rule, out)
                })?;
            }
            ResolutionCase::Reply {
                monitoring_rule,
                answered,
            } => {
                let Some(parent_rule) = self.store.get_by_id::<MonitoringRule>(monitoring_rule)? else {
                    tracing::warn!(
                        participant = %self.participant.id,
                        rule = %monitoring_rule,
                        "monitoring rule of reply no longer exists"
                    );
                    return Ok(out);
                };
                let rules: Vec<MonitoringReplyRule> =
                    self.store.find(&MonitoringReplyRuleQuery::ByMonitoringRuleAndBranch(
                        monitoring_rule,
                        ReplyBranch::for_answer(answered),
                    ))?;
                let tree = RuleTree::build(rules, |_| true);
                self.walk(&tree, None, &mut out, &|this, rule, out| {
                    this.apply_reply_rule(rule, &parent_rule, out)
                })?;
            }
            ResolutionCase::DecisionPoint(point) => {
                let rules: Vec<MicroDialogRule> =
                    self.store.find(&MicroDialogRuleQuery::ByDecisionPoint(point))?;
                let tree = RuleTree::build(rules, |_| true);
                self.walk(&tree, None, &mut out, &|_, rule, out| {
                    Ok(apply_decision_rule(rule, out))
                })?;
            }
        }
        Ok(out)
    }

    fn walk<N: RuleNode>(
        &mut self,
        tree: &RuleTree<N>,
        parent: Option<Uuid>,
        out: &mut Resolution,
        act: &dyn Fn(&mut Self, &N, &mut Resolution) -> Result<Flow>,
    ) -> Result<Flow> {
        let mut skip_above: Option<u32> = None;
        for node in tree.children(parent) {
            if let Some(level) = skip_above {
                if node.level() > level {
                    continue;
                }
                skip_above = None;
            }

            let Some(evaluation) = self.evaluate(node)? else {
                skip_above = Some(node.level());
                continue;
            };
            if let Some(variable) = node.store_value_to_variable() {
                self.store_value(variable, &evaluation);
            }
            if act(self, node, out)? == Flow::Halt {
                return Ok(Flow::Halt);
            }
            if self.walk(tree, Some(node.id()), out, act)? == Flow::Halt {
                return Ok(Flow::Halt);
            }
        }
        Ok(Flow::Continue)
    }

    /// `Some` when the node matches. Evaluation errors count as no match.
    fn evaluate<N: RuleNode>(&mut self, node: &N) -> Result<Option<RuleEvaluation>> {
        let snapshot = self.snapshot()?;
        match rule_evaluator::evaluate(node.condition(), snapshot) {
            Ok(evaluation) if evaluation.matches => Ok(Some(evaluation)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!(
                    participant = %self.participant.id,
                    rule = %node.id(),
                    "rule evaluation failed, treated as not matching: {e}"
                );
                Ok(None)
            }
        }
    }

    fn snapshot(&mut self) -> Result<&Snapshot> {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.variables.snapshot(self.participant, self.context)?);
        }
        Ok(self.snapshot.get_or_insert_with(Snapshot::new))
    }

    fn store_value(&mut self, variable: &str, evaluation: &RuleEvaluation) {
        let value = evaluation.stored_value();
        if let Err(e) = self.variables.write(self.participant.id, variable, &value) {
            tracing::warn!(
                participant = %self.participant.id,
                variable,
                "rule could not store value: {e}"
            );
        }
        self.snapshot = None;
    }

    fn apply_monitoring_rule(&mut self, rule: &MonitoringRule, out: &mut Resolution) -> Result<Flow> {
        let origin = TaskOrigin::MonitoringRule(rule.clone());
        if rule.send_message_if_true {
            self.push_send_task(origin.clone(), rule.message_group, None, true, out)?;
        }
        if let Some(micro_dialog) = rule.activate_micro_dialog {
            out.activations.push(Activation {
                origin,
                micro_dialog,
            });
        }
        if rule.stop_intervention_when_true {
            tracing::info!(participant = %self.participant.id, rule = %rule.id, "rule stops intervention");
            out.stop_intervention = true;
            return Ok(Flow::Halt);
        }
        Ok(Flow::Continue)
    }

    fn apply_reply_rule(
        &mut self,
        rule: &MonitoringReplyRule,
        monitoring_rule: &MonitoringRule,
        out: &mut Resolution,
    ) -> Result<Flow> {
        let origin = TaskOrigin::ReplyRule {
            rule: rule.clone(),
            monitoring_rule: monitoring_rule.clone(),
        };
        if rule.send_message_if_true {
            let context = self.context;
            self.push_send_task(origin.clone(), rule.message_group, context, false, out)?;
        }
        if let Some(micro_dialog) = rule.activate_micro_dialog {
            out.activations.push(Activation {
                origin,
                micro_dialog,
            });
        }
        Ok(Flow::Continue)
    }

    fn push_send_task(
        &mut self,
        origin: TaskOrigin,
        group: Option<Uuid>,
        reply_to: Option<&DialogMessage>,
        monitoring_rule_context: bool,
        out: &mut Resolution,
    ) -> Result<()> {
        let Some(group_id) = group else {
            tracing::warn!(participant = %self.participant.id, "rule sends a message but has no message group");
            return Ok(());
        };
        let Some(group) = self.store.get_by_id::<MonitoringMessageGroup>(group_id)? else {
            tracing::warn!(participant = %self.participant.id, group = %group_id, "message group not found");
            return Ok(());
        };
        let store = self.store;
        let participant = self.participant.id;
        let snapshot = self.snapshot()?;
        let Some(message) = MessageSelector::new(store).select(
            participant,
            &group,
            reply_to,
            monitoring_rule_context,
            snapshot,
        )?
        else {
            return Ok(());
        };
        let text = render_text(&message.text, snapshot);
        out.send_tasks.push(SendTask {
            origin,
            payload: SendPayload {
                group,
                message,
                text,
            },
        });
        Ok(())
    }
}

fn apply_decision_rule(rule: &MicroDialogRule, out: &mut Resolution) -> Flow {
    let directive = if let Some(message) = rule.next_message_when_true {
        DecisionDirective::JumpToMessage(message)
    } else if let Some(micro_dialog) = rule.next_micro_dialog_when_true {
        DecisionDirective::JumpToMicroDialog(micro_dialog)
    } else if rule.stop_micro_dialog_when_true {
        DecisionDirective::Stop
    } else {
        return Flow::Continue;
    };
    out.directive = Some(directive);
    Flow::Halt
}
