use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Clamp the box to a `width` × `height` frame, returning integer
    /// `(x, y, w, h)` or `None` if nothing of the box lies inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// An enrolled person, uniquely identified by `roll_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: String,
    pub roll_id: u32,
}

impl Identity {
    pub fn new(display_name: impl Into<String>, roll_id: u32) -> Self {
        Self {
            display_name: display_name.into(),
            roll_id,
        }
    }

    /// Check the display name can be stored in a sample directory name and a ledger row.
    pub fn validate(&self) -> Result<(), InvalidIdentity> {
        let name = &self.display_name;
        if name.trim().is_empty() {
            return Err(InvalidIdentity::EmptyName);
        }
        if let Some(c) = name
            .chars()
            .find(|c| matches!(c, '_' | ',' | '/' | '\\' | '"') || c.is_control())
        {
            return Err(InvalidIdentity::ReservedCharacter(c));
        }
        Ok(())
    }

    /// Sample directory name: `<displayName>_<rollId>`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.display_name, self.roll_id)
    }

    /// Parse a sample directory name back into an identity.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let (display_name, roll) = name.rsplit_once('_')?;
        if display_name.is_empty() {
            return None;
        }
        Some(Self::new(display_name, roll.parse().ok()?))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.roll_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIdentity {
    #[error("display name is empty")]
    EmptyName,
    #[error("display name contains reserved character {0:?}")]
    ReservedCharacter(char),
}

/// One committed attendance entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: Identity,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Attendance summary for a single day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayStats {
    pub present_count: usize,
    pub total_registered: usize,
    /// Percentage of registered identities present, rounded to one decimal.
    pub attendance_rate: f64,
    pub date: NaiveDate,
    /// Human-readable date, e.g. `17-October-2026`.
    pub date_label: String,
}

impl DayStats {
    pub fn new(date: NaiveDate, present_count: usize, total_registered: usize) -> Self {
        let attendance_rate = if total_registered > 0 {
            (present_count as f64 / total_registered as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            present_count,
            total_registered,
            attendance_rate,
            date,
            date_label: date.format("%d-%B-%Y").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_name_roundtrip() {
        let id = Identity::new("Ada", 42);
        assert_eq!(id.dir_name(), "Ada_42");
        assert_eq!(Identity::from_dir_name("Ada_42"), Some(id));
    }

    #[test]
    fn test_from_dir_name_rejects_garbage() {
        assert_eq!(Identity::from_dir_name("Ada"), None);
        assert_eq!(Identity::from_dir_name("Ada_x"), None);
        assert_eq!(Identity::from_dir_name("_7"), None);
    }

    #[test]
    fn test_validate_reserved_characters() {
        assert!(Identity::new("Ada Lovelace", 1).validate().is_ok());
        assert_eq!(
            Identity::new("a_b", 1).validate(),
            Err(InvalidIdentity::ReservedCharacter('_'))
        );
        assert_eq!(
            Identity::new("a,b", 1).validate(),
            Err(InvalidIdentity::ReservedCharacter(','))
        );
        assert_eq!(Identity::new("  ", 1).validate(), Err(InvalidIdentity::EmptyName));
    }

    #[test]
    fn test_clamp_to_frame() {
        let bbox = BoundingBox { x: -5.0, y: 10.0, width: 20.0, height: 100.0, confidence: 0.9 };
        assert_eq!(bbox.clamp_to(64, 48), Some((0, 10, 15, 38)));

        let outside = BoundingBox { x: 100.0, y: 0.0, width: 10.0, height: 10.0, confidence: 0.9 };
        assert_eq!(outside.clamp_to(64, 48), None);
    }

    #[test]
    fn test_day_stats_rate() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let stats = DayStats::new(date, 1, 3);
        assert_eq!(stats.attendance_rate, 33.3);
        assert_eq!(stats.date_label, "17-October-2026");

        assert_eq!(DayStats::new(date, 0, 0).attendance_rate, 0.0);
    }
}
