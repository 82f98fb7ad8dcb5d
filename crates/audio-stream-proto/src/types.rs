//! Identifiers and positional types shared by sender and receiver.

use std::fmt;

use uuid::Uuid;

/// Globally unique token minted by the sender when a stream begins.
///
/// Every later message for the stream (data, end) and all receiver-side state is keyed by it.
/// Identifiers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Mint a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to a tracked world entity (the emitter of a following stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(EntityId)
    }
}

/// World-space position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ORIGIN: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2},{:.2},{:.2}", self.x, self.y, self.z)
    }
}

/// Parse `x,y,z` (whitespace tolerated around components).
impl std::str::FromStr for Vec3 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(format!("expected x,y,z but got {s:?}"));
        }
        let mut out = [0f64; 3];
        for (slot, part) in out.iter_mut().zip(parts) {
            *slot = part
                .parse::<f64>()
                .map_err(|e| format!("bad coordinate {part:?}: {e}"))?;
        }
        Ok(Vec3::new(out[0], out[1], out[2]))
    }
}

/// Positional source of a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    /// Fixed for the stream's lifetime.
    StaticPoint(Vec3),
    /// Resolved every tick from the receiver's world snapshot.
    FollowedEntity(EntityId),
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anchor::StaticPoint(p) => write!(f, "point({p})"),
            Anchor::FollowedEntity(e) => write!(f, "entity({e})"),
        }
    }
}

/// Per-stream playback limits announced with `StartStream`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackLimits {
    /// Maximum audible distance in world units.
    pub max_distance: f32,
    pub gain: f32,
    pub pitch: f32,
}

impl Default for PlaybackLimits {
    fn default() -> Self {
        Self {
            max_distance: 64.0,
            gain: 1.0,
            pitch: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_are_unique() {
        assert_ne!(StreamId::new(), StreamId::new());
    }

    #[test]
    fn vec3_parses_comma_separated() {
        let v: Vec3 = " 1.5, -2 ,3".parse().unwrap();
        assert_eq!(v, Vec3::new(1.5, -2.0, 3.0));
    }

    #[test]
    fn vec3_rejects_wrong_arity() {
        assert!("1,2".parse::<Vec3>().is_err());
        assert!("1,2,x".parse::<Vec3>().is_err());
    }

    #[test]
    fn vec3_distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-9);
    }
}
