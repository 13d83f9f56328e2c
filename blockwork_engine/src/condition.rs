use blockwork_model::{Actor, Project};

pub const STAGE_HALF_WIDTH: f32 = 240.0;
pub const STAGE_HALF_HEIGHT: f32 = 180.0;
const MOUSE_TOUCH_RADIUS: f32 = 15.0;
const ACTOR_TOUCH_RADIUS: f32 = 20.0;
/// Distance reported when a target cannot be resolved; compares as "very
/// far away" instead of faulting.
const UNREACHABLE_DISTANCE: f32 = 1.0e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    /// Strips a leading comparison operator, longest form first.
    fn strip(expr: &str) -> Option<(CompareOp, &str)> {
        const OPS: [(&str, CompareOp); 6] = [
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ];
        for (token, op) in OPS {
            if let Some(rest) = expr.strip_prefix(token) {
                return Some((op, rest.trim()));
            }
        }
        None
    }

    pub fn apply(self, a: f32, b: f32) -> bool {
        match self {
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
        }
    }
}

/// Evaluates a condition text against live project/actor state.
///
/// Recognized forms (lower-cased, trimmed):
/// `true` | `false` | `0`, `touching <edge|mouse|name|1-based index>`,
/// `key <name>`, `mouse down`, `distance to <target> <op> <number>`,
/// `mouse x|y <op> <number>`. Anything else non-empty is treated as truthy
/// (permissive fallback so editing never breaks a running script).
pub fn eval(project: &Project, actor: &Actor, expr: &str) -> bool {
    let text = expr.trim().to_lowercase();
    if text.is_empty() || text == "true" {
        return true;
    }
    if text == "false" || text == "0" {
        return false;
    }

    if let Some(target) = text.strip_prefix("touching ") {
        return touching(project, actor, target.trim());
    }

    if let Some(key) = text.strip_prefix("key ") {
        return project.key_down(key.trim());
    }

    if text == "mouse down" {
        return project.mouse_down();
    }

    if let Some((target, op, value)) = parse_distance_comparison(&text) {
        return op.apply(distance_to(project, actor, target), value);
    }

    for axis in ['x', 'y'] {
        if let Some((op, value)) = parse_mouse_comparison(&text, axis) {
            let coord = match (project.mouse_world(), axis) {
                (Some((mx, _)), 'x') => mx,
                (Some((_, my)), _) => my,
                (None, _) => 0.0,
            };
            return op.apply(coord, value);
        }
    }

    true
}

/// `distance to <target> <op> <number>`; None when the form doesn't match,
/// which lets `eval` fall through to the permissive default.
fn parse_distance_comparison(text: &str) -> Option<(&str, CompareOp, f32)> {
    let rest = text.strip_prefix("distance to ")?;
    let split = rest.find(' ')?;
    let target = rest[..split].trim();
    let (op, number) = CompareOp::strip(rest[split..].trim())?;
    let value = number.parse::<f32>().ok()?;
    Some((target, op, value))
}

/// `mouse x <op> <number>` / `mouse y <op> <number>`.
fn parse_mouse_comparison(text: &str, axis: char) -> Option<(CompareOp, f32)> {
    let key = if axis == 'x' { "mouse x" } else { "mouse y" };
    let rest = text.strip_prefix(key)?;
    let (op, number) = CompareOp::strip(rest.trim())?;
    let value = number.parse::<f32>().ok()?;
    Some((op, value))
}

fn touching(project: &Project, actor: &Actor, target: &str) -> bool {
    if target.is_empty() {
        return false;
    }

    if target == "edge" {
        return actor.x <= -STAGE_HALF_WIDTH
            || actor.x >= STAGE_HALF_WIDTH
            || actor.y <= -STAGE_HALF_HEIGHT
            || actor.y >= STAGE_HALF_HEIGHT;
    }

    if target == "mouse" {
        let Some((mx, my)) = project.mouse_world() else {
            return false;
        };
        return within(actor, mx, my, MOUSE_TOUCH_RADIUS);
    }

    match target_position(project, target) {
        Some((tx, ty)) => within(actor, tx, ty, ACTOR_TOUCH_RADIUS),
        None => false,
    }
}

fn within(actor: &Actor, x: f32, y: f32, radius: f32) -> bool {
    let dx = actor.x - x;
    let dy = actor.y - y;
    dx * dx + dy * dy <= radius * radius
}

fn distance_to(project: &Project, actor: &Actor, target: &str) -> f32 {
    let position = if target == "mouse" {
        project.mouse_world()
    } else {
        target_position(project, target)
    };
    match position {
        Some((tx, ty)) => {
            let dx = actor.x - tx;
            let dy = actor.y - ty;
            (dx * dx + dy * dy).sqrt()
        }
        None => UNREACHABLE_DISTANCE,
    }
}

/// Resolves an actor target by case-insensitive name first, then as a
/// 1-based index into the actor list.
fn target_position(project: &Project, target: &str) -> Option<(f32, f32)> {
    if let Some(actor) = project
        .actors
        .iter()
        .find(|actor| actor.name.to_lowercase() == target)
    {
        return Some((actor.x, actor.y));
    }
    let index = target.parse::<usize>().ok()?;
    index
        .checked_sub(1)
        .and_then(|i| project.actors.get(i))
        .map(|actor| (actor.x, actor.y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_two_actors() -> Project {
        let mut project = Project::new();
        project.add_actor("Blip");
        project.add_actor("Bloop");
        project
    }

    fn first_actor(project: &Project) -> &Actor {
        &project.actors[0]
    }

    #[test]
    fn literals_and_fallback() {
        let project = project_with_two_actors();
        let actor = first_actor(&project);
        assert!(eval(&project, actor, "true"));
        assert!(eval(&project, actor, " TRUE "));
        assert!(!eval(&project, actor, "false"));
        assert!(!eval(&project, actor, "0"));
        assert!(eval(&project, actor, ""), "empty is truthy");
        assert!(
            eval(&project, actor, "purple monkey dishwasher"),
            "unrecognized text is truthy by design"
        );
    }

    #[test]
    fn touching_edge_uses_stage_bounds() {
        let mut project = project_with_two_actors();
        assert!(!eval(&project, first_actor(&project), "touching edge"));
        project.actors[0].x = 240.0;
        assert!(eval(&project, first_actor(&project), "touching edge"));
        project.actors[0].x = 0.0;
        project.actors[0].y = -180.0;
        assert!(eval(&project, first_actor(&project), "touching edge"));
    }

    #[test]
    fn touching_mouse_requires_a_valid_position() {
        let mut project = project_with_two_actors();
        assert!(!eval(&project, first_actor(&project), "touching mouse"));
        project.set_mouse_world(10.0, 0.0, true);
        assert!(eval(&project, first_actor(&project), "touching mouse"));
        project.set_mouse_world(100.0, 0.0, true);
        assert!(!eval(&project, first_actor(&project), "touching mouse"));
    }

    #[test]
    fn touching_resolves_name_and_one_based_index() {
        let mut project = project_with_two_actors();
        project.actors[1].x = 5.0;
        assert!(eval(&project, first_actor(&project), "touching bloop"));
        assert!(eval(&project, first_actor(&project), "touching 2"));
        project.actors[1].x = 500.0;
        assert!(!eval(&project, first_actor(&project), "touching bloop"));
        assert!(!eval(&project, first_actor(&project), "touching 3"));
        assert!(!eval(&project, first_actor(&project), "touching nobody"));
    }

    #[test]
    fn key_and_mouse_button_read_the_input_snapshot() {
        let mut project = project_with_two_actors();
        assert!(!eval(&project, first_actor(&project), "key space"));
        project.set_key_down("space", true);
        assert!(eval(&project, first_actor(&project), "key space"));
        assert!(eval(&project, first_actor(&project), "key  SPACE "));

        assert!(!eval(&project, first_actor(&project), "mouse down"));
        project.set_mouse_button_down(true);
        assert!(eval(&project, first_actor(&project), "mouse down"));
    }

    #[test]
    fn distance_comparisons_cover_every_operator() {
        let mut project = project_with_two_actors();
        project.actors[1].x = 30.0;

        let actor = first_actor(&project);
        assert!(eval(&project, actor, "distance to bloop < 50"));
        assert!(eval(&project, actor, "distance to bloop <= 30"));
        assert!(!eval(&project, actor, "distance to bloop > 30"));
        assert!(eval(&project, actor, "distance to bloop >= 30"));
        assert!(eval(&project, actor, "distance to bloop == 30"));
        assert!(eval(&project, actor, "distance to bloop != 31"));
    }

    #[test]
    fn distance_to_unresolvable_target_is_very_far() {
        let project = project_with_two_actors();
        let actor = first_actor(&project);
        assert!(eval(&project, actor, "distance to ghost > 100000"));
        assert!(!eval(&project, actor, "distance to ghost < 100000"));
    }

    #[test]
    fn mouse_axis_comparisons() {
        let mut project = project_with_two_actors();
        project.set_mouse_world(12.0, -40.0, true);
        let actor = first_actor(&project);
        assert!(eval(&project, actor, "mouse x > 0"));
        assert!(eval(&project, actor, "mouse x <= 12"));
        assert!(eval(&project, actor, "mouse y < -10"));
        assert!(!eval(&project, actor, "mouse y >= 0"));
    }

    #[test]
    fn invalid_mouse_position_compares_as_origin() {
        let project = project_with_two_actors();
        let actor = first_actor(&project);
        assert!(eval(&project, actor, "mouse x == 0"));
        assert!(eval(&project, actor, "mouse y == 0"));
    }

    #[test]
    fn malformed_comparisons_fall_back_to_truthy() {
        let project = project_with_two_actors();
        let actor = first_actor(&project);
        assert!(eval(&project, actor, "distance to bloop < lots"));
        assert!(eval(&project, actor, "mouse x ~ 5"));
        assert!(eval(&project, actor, "distance to"));
    }
}
