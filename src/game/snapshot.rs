//! World snapshots: the unit of authoritative state sent to clients

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;

/// Public state of one ball, in scene units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallState {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// Rotation in radians
    pub angle: f32,
    #[serde(default)]
    pub angular_velocity: f32,
}

impl BallState {
    /// Euclidean distance between two ball positions (pixels)
    pub fn distance_to(&self, other: &BallState) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// All balls at a given tick. Built once per tick and never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub balls: Vec<BallState>,
}

impl Snapshot {
    pub fn ball(&self, id: &PlayerId) -> Option<&BallState> {
        self.balls.iter().find(|b| &b.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball(id: &str, x: f32, y: f32) -> BallState {
        BallState {
            id: id.into(),
            x,
            y,
            vx: 0.0,
            vy: 0.0,
            angle: 0.0,
            angular_velocity: 0.0,
        }
    }

    #[test]
    fn snapshot_wire_shape_is_camel_case() {
        let snapshot = Snapshot {
            tick: 7,
            balls: vec![BallState {
                angular_velocity: 1.5,
                ..ball("p1", 1.0, 2.0)
            }],
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["tick"], 7);
        assert_eq!(json["balls"][0]["id"], "p1");
        assert_eq!(json["balls"][0]["angularVelocity"], 1.5);
    }

    #[test]
    fn missing_angular_velocity_defaults_to_zero() {
        let state: BallState =
            serde_json::from_str(r#"{"id":"p","x":1,"y":2,"vx":0,"vy":0,"angle":0}"#).unwrap();
        assert_eq!(state.angular_velocity, 0.0);
    }

    #[test]
    fn lookup_and_distance() {
        let snapshot = Snapshot {
            tick: 1,
            balls: vec![ball("a", 0.0, 0.0), ball("b", 3.0, 4.0)],
        };

        let a = snapshot.ball(&"a".into()).unwrap();
        let b = snapshot.ball(&"b".into()).unwrap();
        assert_eq!(a.distance_to(b), 5.0);
        assert!(snapshot.ball(&"c".into()).is_none());
    }
}
