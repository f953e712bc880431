//! Roadmap progress: learning areas, key points and the node graph.
//!
//! Node status only ever moves `locked → active → completed`, and a node can
//! only become active once every prerequisite node is completed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaypointError};

/// Load state of a learning area's generated detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetailStatus {
    /// Only the title is known.
    #[default]
    Skeleton,
    /// Detail generation is in flight.
    Loading,
    /// Key points are available.
    Loaded,
}

impl DetailStatus {
    /// Check whether moving to `next` is allowed.
    ///
    /// A failed fetch may drop `loading` back to `skeleton`; `loaded` is final.
    pub fn can_transition_to(self, next: DetailStatus) -> bool {
        matches!(
            (self, next),
            (DetailStatus::Skeleton, DetailStatus::Loading)
                | (DetailStatus::Loading, DetailStatus::Loaded)
                | (DetailStatus::Loading, DetailStatus::Skeleton)
        )
    }
}

/// Status of a roadmap node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Prerequisites are not yet completed.
    Locked,
    /// Open for study.
    Active,
    /// Finished.
    Completed,
}

impl NodeStatus {
    /// Check whether moving to `next` is a legal forward step.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Locked, NodeStatus::Active) | (NodeStatus::Active, NodeStatus::Completed)
        )
    }

    fn name(self) -> &'static str {
        match self {
            NodeStatus::Locked => "locked",
            NodeStatus::Active => "active",
            NodeStatus::Completed => "completed",
        }
    }
}

/// A key point inside a learning area.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPoint {
    pub id: String,
    pub title: String,
}

/// A learning area of a roadmap. Detail is generated lazily.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearningArea {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub key_points: Vec<KeyPoint>,
    #[serde(default)]
    pub detail_status: DetailStatus,
}

/// A node in the roadmap graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapNode {
    pub id: String,
    pub title: String,
    /// Ids of nodes that must be completed first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub status: NodeStatus,
}

/// Lesson counters for one node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeProgress {
    pub status: NodeStatus,
    pub completed_lessons: u32,
    pub total_lessons: u32,
}

/// Progress through one roadmap (one per distinct topic).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapProgress {
    pub topic: String,
    #[serde(default)]
    pub learning_areas: Vec<LearningArea>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub completed_key_points: BTreeSet<String>,
    #[serde(default)]
    pub roadmap_definitions: Vec<RoadmapNode>,
    #[serde(default)]
    pub roadmap_progress: BTreeMap<String, NodeProgress>,
}

// =============================================================================
// Content-generation payload
// =============================================================================

/// Generated roadmap content, as handed over by the content pipeline.
///
/// Treated as already-validated structured data; only graph consistency is
/// checked when it is turned into a [`RoadmapProgress`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapBlueprint {
    pub topic: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub learning_areas: Vec<AreaBlueprint>,
    pub nodes: Vec<NodeBlueprint>,
}

/// Generated learning area skeleton.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AreaBlueprint {
    pub id: String,
    pub title: String,
}

/// Generated roadmap node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeBlueprint {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub total_lessons: u32,
}

impl RoadmapProgress {
    /// Build a fresh roadmap from generated content.
    ///
    /// Nodes without prerequisites start active, all others locked. Fails on
    /// an empty topic, duplicate node ids, unknown prerequisites or cycles.
    pub fn from_blueprint(blueprint: RoadmapBlueprint) -> Result<Self> {
        if blueprint.topic.trim().is_empty() {
            return Err(WaypointError::invalid_state("roadmap topic is empty"));
        }
        check_graph(&blueprint.nodes)?;

        let mut roadmap_definitions = Vec::with_capacity(blueprint.nodes.len());
        let mut roadmap_progress = BTreeMap::new();
        for node in blueprint.nodes {
            let status = if node.prerequisites.is_empty() {
                NodeStatus::Active
            } else {
                NodeStatus::Locked
            };
            roadmap_progress.insert(
                node.id.clone(),
                NodeProgress {
                    status,
                    completed_lessons: 0,
                    total_lessons: node.total_lessons,
                },
            );
            roadmap_definitions.push(RoadmapNode {
                id: node.id,
                title: node.title,
                prerequisites: node.prerequisites,
                status,
            });
        }

        let learning_areas = blueprint
            .learning_areas
            .into_iter()
            .map(|area| LearningArea {
                id: area.id,
                title: area.title,
                key_points: Vec::new(),
                detail_status: DetailStatus::Skeleton,
            })
            .collect();

        Ok(Self {
            topic: blueprint.topic,
            learning_areas,
            prerequisites: blueprint.prerequisites,
            goal: blueprint.goal,
            completed_key_points: BTreeSet::new(),
            roadmap_definitions,
            roadmap_progress,
        })
    }

    /// Look up a node definition.
    pub fn node(&self, node_id: &str) -> Option<&RoadmapNode> {
        self.roadmap_definitions.iter().find(|n| n.id == node_id)
    }

    /// Current status of a node.
    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.node(node_id).map(|n| n.status)
    }

    /// Whether every prerequisite of `node` is completed.
    fn prerequisites_met(&self, node: &RoadmapNode) -> bool {
        node.prerequisites
            .iter()
            .all(|p| self.node_status(p) == Some(NodeStatus::Completed))
    }

    /// Transition: locked → active.
    pub fn activate_node(&mut self, node_id: &str) -> Result<()> {
        let node = self
            .node(node_id)
            .ok_or_else(|| WaypointError::not_found("roadmap node", node_id))?;
        if !node.status.can_transition_to(NodeStatus::Active) {
            return Err(WaypointError::invalid_state(format!(
                "cannot activate node {} in {} state",
                node_id,
                node.status.name()
            )));
        }
        if !self.prerequisites_met(node) {
            return Err(WaypointError::invalid_state(format!(
                "cannot activate node {}: prerequisites not completed",
                node_id
            )));
        }
        self.set_status(node_id, NodeStatus::Active);
        Ok(())
    }

    /// Transition: active → completed.
    ///
    /// Dependents whose prerequisites are now all completed are activated.
    /// Returns the ids of the nodes that became active.
    pub fn complete_node(&mut self, node_id: &str) -> Result<Vec<String>> {
        let status = self
            .node_status(node_id)
            .ok_or_else(|| WaypointError::not_found("roadmap node", node_id))?;
        if !status.can_transition_to(NodeStatus::Completed) {
            return Err(WaypointError::invalid_state(format!(
                "cannot complete node {} in {} state",
                node_id,
                status.name()
            )));
        }

        self.set_status(node_id, NodeStatus::Completed);
        if let Some(progress) = self.roadmap_progress.get_mut(node_id) {
            progress.completed_lessons = progress.total_lessons;
        }

        let unlocked: Vec<String> = self
            .roadmap_definitions
            .iter()
            .filter(|n| n.status == NodeStatus::Locked && self.prerequisites_met(n))
            .map(|n| n.id.clone())
            .collect();
        for id in &unlocked {
            self.set_status(id, NodeStatus::Active);
        }
        Ok(unlocked)
    }

    /// Count one finished lesson inside an active node.
    ///
    /// The node completes when its lesson count reaches the total. Returns
    /// `true` when this call completed the node. Lessons on completed nodes
    /// are ignored.
    pub fn record_node_lesson(&mut self, node_id: &str) -> Result<bool> {
        let status = self
            .node_status(node_id)
            .ok_or_else(|| WaypointError::not_found("roadmap node", node_id))?;
        match status {
            NodeStatus::Completed => return Ok(false),
            NodeStatus::Locked => {
                return Err(WaypointError::invalid_state(format!(
                    "cannot record lesson on locked node {}",
                    node_id
                )))
            }
            NodeStatus::Active => {}
        }

        let progress = self
            .roadmap_progress
            .entry(node_id.to_string())
            .or_insert(NodeProgress {
                status,
                completed_lessons: 0,
                total_lessons: 0,
            });
        progress.completed_lessons = (progress.completed_lessons + 1).min(progress.total_lessons);
        let finished = progress.total_lessons > 0 && progress.completed_lessons >= progress.total_lessons;

        if finished {
            self.complete_node(node_id)?;
        }
        Ok(finished)
    }

    /// Mark a key point complete. Returns `true` if it was new.
    pub fn complete_key_point(&mut self, key_point_id: impl Into<String>) -> bool {
        self.completed_key_points.insert(key_point_id.into())
    }

    /// Move a learning area's detail status forward.
    pub fn set_area_status(&mut self, area_id: &str, next: DetailStatus) -> Result<()> {
        let area = self
            .learning_areas
            .iter_mut()
            .find(|a| a.id == area_id)
            .ok_or_else(|| WaypointError::not_found("learning area", area_id))?;
        if !area.detail_status.can_transition_to(next) {
            return Err(WaypointError::invalid_state(format!(
                "cannot move learning area {} from {:?} to {:?}",
                area_id, area.detail_status, next
            )));
        }
        area.detail_status = next;
        Ok(())
    }

    /// Attach generated key points and mark the area loaded.
    pub fn load_area_detail(&mut self, area_id: &str, key_points: Vec<KeyPoint>) -> Result<()> {
        self.set_area_status(area_id, DetailStatus::Loaded)?;
        if let Some(area) = self.learning_areas.iter_mut().find(|a| a.id == area_id) {
            area.key_points = key_points;
        }
        Ok(())
    }

    /// Whether every node is completed.
    pub fn is_completed(&self) -> bool {
        !self.roadmap_definitions.is_empty()
            && self
                .roadmap_definitions
                .iter()
                .all(|n| n.status == NodeStatus::Completed)
    }

    /// Number of completed nodes.
    pub fn completed_nodes(&self) -> usize {
        self.roadmap_definitions
            .iter()
            .filter(|n| n.status == NodeStatus::Completed)
            .count()
    }

    /// Check the roadmap's internal consistency.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.topic.trim().is_empty() {
            return Err("roadmap topic is empty".to_string());
        }
        for node in &self.roadmap_definitions {
            if let Some(progress) = self.roadmap_progress.get(&node.id) {
                if progress.status != node.status {
                    return Err(format!(
                        "node {} status differs between definitions and progress",
                        node.id
                    ));
                }
            }
            if node.status != NodeStatus::Locked && !self.prerequisites_met(node) {
                return Err(format!(
                    "node {} is {} before its prerequisites completed",
                    node.id,
                    node.status.name()
                ));
            }
        }
        for id in self.roadmap_progress.keys() {
            if self.node(id).is_none() {
                return Err(format!("progress entry for unknown node {}", id));
            }
        }
        Ok(())
    }

    fn set_status(&mut self, node_id: &str, status: NodeStatus) {
        if let Some(node) = self.roadmap_definitions.iter_mut().find(|n| n.id == node_id) {
            node.status = status;
        }
        self.roadmap_progress
            .entry(node_id.to_string())
            .and_modify(|p| p.status = status)
            .or_insert(NodeProgress {
                status,
                completed_lessons: 0,
                total_lessons: 0,
            });
    }
}

/// Reject duplicate ids, unknown prerequisites and cycles.
fn check_graph(nodes: &[NodeBlueprint]) -> Result<()> {
    let mut ids = HashSet::new();
    for node in nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(WaypointError::invalid_state(format!(
                "duplicate roadmap node {}",
                node.id
            )));
        }
    }
    for node in nodes {
        if let Some(missing) = node.prerequisites.iter().find(|p| !ids.contains(p.as_str())) {
            return Err(WaypointError::not_found("roadmap node", missing.clone()));
        }
    }

    // Kahn's algorithm: every node must be reachable from the roots.
    let mut remaining: HashMap<&str, usize> = nodes
        .iter()
        .map(|n| (n.id.as_str(), n.prerequisites.len()))
        .collect();
    let mut ready: Vec<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    while let Some(id) = ready.pop() {
        visited += 1;
        for node in nodes.iter().filter(|n| n.prerequisites.iter().any(|p| p == id)) {
            if let Some(count) = remaining.get_mut(node.id.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.push(node.id.as_str());
                }
            }
        }
    }
    if visited != nodes.len() {
        return Err(WaypointError::invalid_state(
            "roadmap node prerequisites form a cycle",
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// basics → (ownership, traits) → async
    pub(crate) fn sample_blueprint(topic: &str) -> RoadmapBlueprint {
        RoadmapBlueprint {
            topic: topic.to_string(),
            goal: format!("Ship something in {}", topic),
            prerequisites: vec!["programming basics".to_string()],
            learning_areas: vec![AreaBlueprint {
                id: "fundamentals".to_string(),
                title: "Fundamentals".to_string(),
            }],
            nodes: vec![
                node("basics", &[], 2),
                node("ownership", &["basics"], 3),
                node("traits", &["basics"], 2),
                node("async", &["ownership", "traits"], 4),
            ],
        }
    }

    fn node(id: &str, prereqs: &[&str], lessons: u32) -> NodeBlueprint {
        NodeBlueprint {
            id: id.to_string(),
            title: id.to_uppercase(),
            prerequisites: prereqs.iter().map(|p| p.to_string()).collect(),
            total_lessons: lessons,
        }
    }

    pub(crate) fn sample_roadmap(topic: &str) -> RoadmapProgress {
        RoadmapProgress::from_blueprint(sample_blueprint(topic)).unwrap()
    }

    #[test]
    fn test_from_blueprint_initial_statuses() {
        let roadmap = sample_roadmap("rust");
        assert_eq!(roadmap.node_status("basics"), Some(NodeStatus::Active));
        assert_eq!(roadmap.node_status("ownership"), Some(NodeStatus::Locked));
        assert_eq!(roadmap.node_status("async"), Some(NodeStatus::Locked));
        assert_eq!(roadmap.roadmap_progress["ownership"].total_lessons, 3);
        assert_eq!(
            roadmap.learning_areas[0].detail_status,
            DetailStatus::Skeleton
        );
        assert!(roadmap.validate().is_ok());
    }

    #[test]
    fn test_from_blueprint_rejects_unknown_prerequisite() {
        let mut bp = sample_blueprint("rust");
        bp.nodes.push(node("macros", &["missing"], 1));
        let err = RoadmapProgress::from_blueprint(bp).unwrap_err();
        assert!(matches!(err, WaypointError::NotFound { .. }));
    }

    #[test]
    fn test_from_blueprint_rejects_cycle() {
        let bp = RoadmapBlueprint {
            topic: "loop".to_string(),
            goal: String::new(),
            prerequisites: vec![],
            learning_areas: vec![],
            nodes: vec![node("a", &["b"], 1), node("b", &["a"], 1)],
        };
        assert!(RoadmapProgress::from_blueprint(bp).is_err());
    }

    #[test]
    fn test_from_blueprint_rejects_duplicates_and_empty_topic() {
        let mut bp = sample_blueprint("rust");
        bp.nodes.push(node("basics", &[], 1));
        assert!(RoadmapProgress::from_blueprint(bp).is_err());

        let mut bp = sample_blueprint("rust");
        bp.topic = "  ".to_string();
        assert!(RoadmapProgress::from_blueprint(bp).is_err());
    }

    #[test]
    fn test_complete_node_unlocks_dependents() {
        let mut roadmap = sample_roadmap("rust");

        let unlocked = roadmap.complete_node("basics").unwrap();
        assert_eq!(unlocked.len(), 2);
        assert_eq!(roadmap.node_status("ownership"), Some(NodeStatus::Active));
        assert_eq!(roadmap.node_status("traits"), Some(NodeStatus::Active));
        assert_eq!(roadmap.node_status("async"), Some(NodeStatus::Locked));

        roadmap.complete_node("ownership").unwrap();
        assert_eq!(roadmap.node_status("async"), Some(NodeStatus::Locked));
        let unlocked = roadmap.complete_node("traits").unwrap();
        assert_eq!(unlocked, vec!["async".to_string()]);
        assert!(roadmap.validate().is_ok());
    }

    #[test]
    fn test_complete_locked_node_fails() {
        let mut roadmap = sample_roadmap("rust");
        let err = roadmap.complete_node("async").unwrap_err();
        assert!(matches!(err, WaypointError::InvalidState { .. }));
    }

    #[test]
    fn test_complete_twice_fails() {
        let mut roadmap = sample_roadmap("rust");
        roadmap.complete_node("basics").unwrap();
        assert!(roadmap.complete_node("basics").is_err());
    }

    #[test]
    fn test_activate_requires_prerequisites() {
        let mut roadmap = sample_roadmap("rust");
        assert!(roadmap.activate_node("ownership").is_err());
        assert!(roadmap.activate_node("basics").is_err()); // already active
        assert!(roadmap.activate_node("nope").is_err());
    }

    #[test]
    fn test_record_node_lesson_completes_node() {
        let mut roadmap = sample_roadmap("rust");
        assert!(!roadmap.record_node_lesson("basics").unwrap());
        assert_eq!(roadmap.roadmap_progress["basics"].completed_lessons, 1);
        assert!(roadmap.record_node_lesson("basics").unwrap());
        assert_eq!(roadmap.node_status("basics"), Some(NodeStatus::Completed));
        // Further lessons on a completed node are ignored.
        assert!(!roadmap.record_node_lesson("basics").unwrap());
        assert_eq!(roadmap.roadmap_progress["basics"].completed_lessons, 2);
    }

    #[test]
    fn test_record_lesson_on_locked_node_fails() {
        let mut roadmap = sample_roadmap("rust");
        assert!(roadmap.record_node_lesson("async").is_err());
    }

    #[test]
    fn test_is_completed() {
        let mut roadmap = sample_roadmap("rust");
        assert!(!roadmap.is_completed());
        for id in ["basics", "ownership", "traits", "async"] {
            roadmap.complete_node(id).unwrap();
        }
        assert!(roadmap.is_completed());
        assert_eq!(roadmap.completed_nodes(), 4);
    }

    #[test]
    fn test_key_points_are_a_set() {
        let mut roadmap = sample_roadmap("rust");
        assert!(roadmap.complete_key_point("kp1"));
        assert!(!roadmap.complete_key_point("kp1"));
        assert_eq!(roadmap.completed_key_points.len(), 1);
    }

    #[test]
    fn test_area_detail_lifecycle() {
        let mut roadmap = sample_roadmap("rust");
        assert!(roadmap
            .set_area_status("fundamentals", DetailStatus::Loaded)
            .is_err());
        roadmap
            .set_area_status("fundamentals", DetailStatus::Loading)
            .unwrap();
        roadmap
            .set_area_status("fundamentals", DetailStatus::Skeleton)
            .unwrap();
        roadmap
            .set_area_status("fundamentals", DetailStatus::Loading)
            .unwrap();
        roadmap
            .load_area_detail(
                "fundamentals",
                vec![KeyPoint {
                    id: "kp1".to_string(),
                    title: "Variables".to_string(),
                }],
            )
            .unwrap();
        let area = &roadmap.learning_areas[0];
        assert_eq!(area.detail_status, DetailStatus::Loaded);
        assert_eq!(area.key_points.len(), 1);
    }

    #[test]
    fn test_validate_detects_premature_activation() {
        let mut roadmap = sample_roadmap("rust");
        roadmap.roadmap_definitions[3].status = NodeStatus::Active;
        roadmap.roadmap_progress.get_mut("async").unwrap().status = NodeStatus::Active;
        assert!(roadmap.validate().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&NodeStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let json = serde_json::to_string(&DetailStatus::Loading).unwrap();
        assert_eq!(json, "\"loading\"");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Property: whatever sequence of operations is attempted, no node
            // ever moves backwards and the roadmap stays consistent.
            #[test]
            fn prop_node_status_never_regresses(
                ops in prop::collection::vec((0usize..4, 0u8..3), 0..40),
            ) {
                let ids = ["basics", "ownership", "traits", "async"];
                let mut roadmap = sample_roadmap("rust");
                for (idx, op) in ops {
                    let id = ids[idx];
                    let before = roadmap.node_status(id).unwrap();
                    let _ = match op {
                        0 => roadmap.activate_node(id).map(|_| ()),
                        1 => roadmap.complete_node(id).map(|_| ()),
                        _ => roadmap.record_node_lesson(id).map(|_| ()),
                    };
                    let after = roadmap.node_status(id).unwrap();
                    prop_assert!(after >= before);
                    prop_assert!(roadmap.validate().is_ok());
                }
            }
        }
    }
}
