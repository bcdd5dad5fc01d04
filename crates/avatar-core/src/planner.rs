//! Goal planner.
//!
//! Expands the free-text goal of a [`Decision::ActGoal`] into discrete
//! action names by keyword matching. Goals may be written in English or
//! Portuguese. Unknown goals plan to `IDLE`.
//!
//! [`Decision::ActGoal`]: avatar_types::Decision::ActGoal

use tracing::{debug, warn};

/// Action name for moving left.
pub const MOVE_LEFT: &str = "MOVE_LEFT";
/// Action name for moving right.
pub const MOVE_RIGHT: &str = "MOVE_RIGHT";
/// Action name for jumping.
pub const JUMP: &str = "JUMP";
/// Action name for attacking.
pub const ATTACK: &str = "ATTACK";
/// Action name for standing still.
pub const IDLE: &str = "IDLE";

/// Keywords per action, checked in this order.
const KEYWORDS: &[(&str, &[&str])] = &[
    (MOVE_LEFT, &["esquerda", "left", "esquerdo"]),
    (MOVE_RIGHT, &["direita", "right", "direito"]),
    (
        JUMP,
        &["pular", "jump", "pulo", "saltar", "obstáculo", "obstaculo", "plataforma"],
    ),
    (
        ATTACK,
        &["atacar", "attack", "golpear", "bater", "inimigo", "enemy"],
    ),
    (IDLE, &["parar", "idle", "esperar", "aguardar", "nada"]),
];

const EVADE_WORDS: &[&str] = &["desviar", "fugir", "esquivar", "evitar", "dodge", "evade"];

/// Keyword-driven goal planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoalPlanner;

impl GoalPlanner {
    /// Create a planner.
    pub const fn new() -> Self {
        Self
    }

    /// Expand a goal into action names. Never returns an empty list.
    pub fn plan(&self, goal: &str) -> Vec<String> {
        let goal = goal.trim().to_lowercase();
        if goal.is_empty() {
            return vec![IDLE.to_owned()];
        }

        let mut actions: Vec<&str> = KEYWORDS
            .iter()
            .filter(|(_, words)| words.iter().any(|w| goal.contains(w)))
            .map(|(action, _)| *action)
            .collect();

        if actions.is_empty() {
            actions = infer(&goal);
        }

        if actions.is_empty() {
            warn!(goal = %goal, "no action matched goal");
            return vec![IDLE.to_owned()];
        }

        debug!(goal = %goal, actions = ?actions, "goal planned");
        actions.into_iter().map(str::to_owned).collect()
    }

    /// Expand a goal and keep at most `max_actions` actions.
    pub fn plan_sequence(&self, goal: &str, max_actions: usize) -> Vec<String> {
        let mut actions = self.plan(goal);
        actions.truncate(max_actions.max(1));
        actions
    }
}

/// Looser matching for goals that only describe intent.
fn infer(goal: &str) -> Vec<&'static str> {
    let mut actions = Vec::new();
    if EVADE_WORDS.iter().any(|w| goal.contains(w)) {
        if goal.contains("direita") || goal.contains("right") {
            actions.push(MOVE_RIGHT);
        } else {
            actions.push(MOVE_LEFT);
        }
    }
    if ["salt", "pul", "hop", "leap"].iter().any(|w| goal.contains(w)) {
        actions.push(JUMP);
    }
    if ["golpe", "hit", "strike", "fight", "lutar"]
        .iter()
        .any(|w| goal.contains(w))
    {
        actions.push(ATTACK);
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(goal: &str) -> Vec<String> {
        GoalPlanner::new().plan(goal)
    }

    #[test]
    fn keywords_map_in_table_order() {
        assert_eq!(plan("pular o obstáculo"), ["JUMP"]);
        assert_eq!(plan("Attack the enemy and jump left"), ["MOVE_LEFT", "JUMP", "ATTACK"]);
        assert_eq!(plan("ir para a direita"), ["MOVE_RIGHT"]);
    }

    #[test]
    fn evasion_defaults_left() {
        assert_eq!(plan("desviar"), ["MOVE_LEFT"]);
        assert_eq!(plan("dodge the fireball"), ["MOVE_LEFT"]);
        assert_eq!(plan("hop over it"), ["JUMP"]);
    }

    #[test]
    fn unknown_or_empty_goal_is_idle() {
        assert_eq!(plan(""), ["IDLE"]);
        assert_eq!(plan("   "), ["IDLE"]);
        assert_eq!(plan("contemplate the sky"), ["IDLE"]);
    }

    #[test]
    fn sequence_is_truncated() {
        let planner = GoalPlanner::new();
        let all = planner.plan("left right jump attack");
        assert_eq!(all.len(), 4);
        assert_eq!(planner.plan_sequence("left right jump attack", 2), ["MOVE_LEFT", "MOVE_RIGHT"]);
        assert_eq!(planner.plan_sequence("left", 3), ["MOVE_LEFT"]);
    }
}
