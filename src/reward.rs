use serde::{Deserialize, Serialize};

// Reference reward configuration. Static and process-wide; nothing here is
// mutated after startup.
pub const LECTURE_XP: u32 = 50;
pub const TEST_BASE_XP: u32 = 100;
pub const TEST_LEVEL_MULTIPLIER: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Lecture,
    Test,
    Exam,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Lecture => "lecture",
            ActivityKind::Test => "test",
            ActivityKind::Exam => "exam",
        }
    }

    pub fn from_db(s: &str) -> Option<ActivityKind> {
        match s {
            "lecture" => Some(ActivityKind::Lecture),
            "test" => Some(ActivityKind::Test),
            "exam" => Some(ActivityKind::Exam),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyTier {
    Beginner,
    Intermediate,
    Advanced,
}

impl DifficultyTier {
    pub fn multiplier(&self) -> f64 {
        match self {
            DifficultyTier::Beginner => 1.0,
            DifficultyTier::Intermediate => 1.5,
            DifficultyTier::Advanced => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyTier::Beginner => "BEGINNER",
            DifficultyTier::Intermediate => "INTERMEDIATE",
            DifficultyTier::Advanced => "ADVANCED",
        }
    }

    pub fn parse(s: &str) -> Option<DifficultyTier> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BEGINNER" => Some(DifficultyTier::Beginner),
            "INTERMEDIATE" => Some(DifficultyTier::Intermediate),
            "ADVANCED" => Some(DifficultyTier::Advanced),
            _ => None,
        }
    }

    /// First unlock level of the tier; a labelled file's sequence number is
    /// added on top, so `beginner_1` is level 1 and `advanced_2` is level 8.
    pub fn base_level(&self) -> u32 {
        match self {
            DifficultyTier::Beginner => 0,
            DifficultyTier::Intermediate => 3,
            DifficultyTier::Advanced => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl RankTier {
    pub fn exam_reward(&self) -> u32 {
        match self {
            RankTier::Bronze => 200,
            RankTier::Silver => 400,
            RankTier::Gold => 700,
            RankTier::Platinum => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RankTier::Bronze => "BRONZE",
            RankTier::Silver => "SILVER",
            RankTier::Gold => "GOLD",
            RankTier::Platinum => "PLATINUM",
        }
    }

    pub fn parse(s: &str) -> Option<RankTier> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BRONZE" => Some(RankTier::Bronze),
            "SILVER" => Some(RankTier::Silver),
            "GOLD" => Some(RankTier::Gold),
            "PLATINUM" => Some(RankTier::Platinum),
            _ => None,
        }
    }

    pub fn from_level(level: u32) -> RankTier {
        match level {
            0..=2 => RankTier::Bronze,
            3..=5 => RankTier::Silver,
            6..=7 => RankTier::Gold,
            _ => RankTier::Platinum,
        }
    }
}

/// XP awarded for completing an activity. No error path: an unknown kind is
/// worth 0 and missing difficulty/tier degrade to defaults rather than
/// failing. `kind` arrives as a raw string because programs store it that
/// way and unrecognized values must stay silent-zero.
pub fn calculate_xp_reward(
    kind: &str,
    level: u32,
    difficulty: Option<DifficultyTier>,
    rank_tier: Option<RankTier>,
) -> u32 {
    match ActivityKind::from_db(kind) {
        Some(ActivityKind::Lecture) => LECTURE_XP,
        Some(ActivityKind::Test) => {
            let mult = difficulty.map(|d| d.multiplier()).unwrap_or(1.0);
            // Stored levels span the full u32 range; widen before multiplying
            // and let the cast saturate at u32::MAX.
            let base = TEST_BASE_XP as u64 + level as u64 * TEST_LEVEL_MULTIPLIER as u64;
            ((base as f64) * mult).floor() as u32
        }
        Some(ActivityKind::Exam) => rank_tier
            .unwrap_or_else(|| RankTier::from_level(level))
            .exam_reward(),
        None => 0,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LevelThreshold {
    pub level: u32,
    pub min_xp: u32,
    pub rank_name: &'static str,
}

/// Ordered, strictly increasing in `min_xp`. The first entry must be 0 XP so
/// every user has a standing.
pub const LEVEL_TABLE: &[LevelThreshold] = &[
    LevelThreshold { level: 1, min_xp: 0, rank_name: "Trainee" },
    LevelThreshold { level: 2, min_xp: 100, rank_name: "Apprentice" },
    LevelThreshold { level: 3, min_xp: 250, rank_name: "Associate" },
    LevelThreshold { level: 4, min_xp: 500, rank_name: "Practitioner" },
    LevelThreshold { level: 5, min_xp: 850, rank_name: "Specialist" },
    LevelThreshold { level: 6, min_xp: 1300, rank_name: "Senior" },
    LevelThreshold { level: 7, min_xp: 2000, rank_name: "Expert" },
    LevelThreshold { level: 8, min_xp: 3000, rank_name: "Master" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelStanding {
    pub level: u32,
    pub rank: &'static str,
    pub min_xp: u32,
    /// `None` once the top threshold is reached.
    pub next_min_xp: Option<u32>,
}

/// Highest threshold whose `min_xp` does not exceed `xp`.
pub fn calculate_level(xp: u32) -> LevelStanding {
    let mut idx = 0;
    for (i, t) in LEVEL_TABLE.iter().enumerate() {
        if t.min_xp <= xp {
            idx = i;
        } else {
            break;
        }
    }
    let current = LEVEL_TABLE[idx];
    LevelStanding {
        level: current.level,
        rank: current.rank_name,
        min_xp: current.min_xp,
        next_min_xp: LEVEL_TABLE.get(idx + 1).map(|t| t.min_xp),
    }
}

/// Progress toward the next threshold as 0..=100, 100 at the top tier.
pub fn progress_percent(xp: u32) -> f64 {
    let standing = calculate_level(xp);
    let Some(next) = standing.next_min_xp else {
        return 100.0;
    };
    let span = (next - standing.min_xp) as f64;
    let into = xp.saturating_sub(standing.min_xp) as f64;
    (100.0 * into / span).clamp(0.0, 100.0)
}

/// Parse a content-file level label like `intermediate_2` or `ADVANCED-1`
/// into its tier and sequence number.
pub fn parse_level_label(label: &str) -> Option<(DifficultyTier, u32)> {
    let trimmed = label.trim();
    let (tier_part, seq_part) = trimmed.split_once(|c| c == '_' || c == '-')?;
    let tier = DifficultyTier::parse(tier_part)?;
    let seq: u32 = seq_part.trim().parse().ok()?;
    if seq == 0 {
        return None;
    }
    Some((tier, seq))
}

/// Unlock level for a labelled program: tier base plus sequence. `None` when
/// the sum leaves the level range.
pub fn unlock_level(tier: DifficultyTier, seq: u32) -> Option<u32> {
    tier.base_level().checked_add(seq)
}
