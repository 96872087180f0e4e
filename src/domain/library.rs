//! Pose library - named motion sequences for both modes
//!
//! Drills are played in Mode A with a sampled first axis; reactions are
//! looked up by sequence key in Mode B. The library is built once at
//! startup (built-in catalog or a TOML file) and never mutated afterwards.

use crate::domain::types::{
    IoToggle, JointPose, MotionSequence, SequenceKey, ToggleTiming, OVERFLOW_KEY,
};
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// PTP speed used for every step of the built-in reactions
const REACTION_SPEED: u8 = 50;

/// Pause after each reaction step
const REACTION_SETTLE_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to read pose library {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse pose library {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize)]
struct SequenceFile {
    name: String,
    poses: Vec<JointPose>,
    speeds: Vec<u8>,
    #[serde(default)]
    toggles: Vec<IoToggle>,
    #[serde(default)]
    settle_ms: u64,
}

impl From<SequenceFile> for MotionSequence {
    fn from(s: SequenceFile) -> Self {
        MotionSequence::new(s.name, s.poses, s.speeds)
            .with_toggles(s.toggles)
            .with_settle_ms(s.settle_ms)
    }
}

#[derive(Debug, Deserialize)]
struct LibraryFile {
    #[serde(default)]
    drill: Vec<SequenceFile>,
    #[serde(default)]
    reaction: Vec<SequenceFile>,
}

/// Catalog of drills (Mode A) and keyed reactions (Mode B)
#[derive(Debug, Clone, Default)]
pub struct PoseLibrary {
    drills: Vec<MotionSequence>,
    reactions: FxHashMap<String, MotionSequence>,
}

impl PoseLibrary {
    pub fn new(drills: Vec<MotionSequence>, reactions: Vec<MotionSequence>) -> Self {
        let reactions = reactions.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { drills, reactions }
    }

    /// Load a library from a TOML file
    ///
    /// Speed/pose length mismatches are not checked here; the executor
    /// rejects such sequences when they are run.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| LibraryError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
            .map_err(|source| LibraryError::Parse { path: path.to_path_buf(), source })
    }

    fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let file: LibraryFile = toml::from_str(content)?;
        Ok(Self::new(
            file.drill.into_iter().map(Into::into).collect(),
            file.reaction.into_iter().map(Into::into).collect(),
        ))
    }

    /// Pick a drill uniformly at random
    pub fn random_drill<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&MotionSequence> {
        self.drills.choose(rng)
    }

    pub fn drill(&self, name: &str) -> Option<&MotionSequence> {
        self.drills.iter().find(|s| s.name == name)
    }

    pub fn reaction(&self, key: &SequenceKey) -> Option<&MotionSequence> {
        self.reactions.get(&key.to_string())
    }

    pub fn drill_count(&self) -> usize {
        self.drills.len()
    }

    pub fn reaction_count(&self) -> usize {
        self.reactions.len()
    }

    /// Catalog used by the installation
    pub fn builtin() -> Self {
        Self::new(vec![builtin_drill()], builtin_reactions())
    }
}

fn builtin_drill() -> MotionSequence {
    let poses = vec![
        JointPose([0.000, 0.000, 0.000, 0.000, 50.000, 0.000]),
        JointPose([0.000, -55.000, -2.500, 0.000, 54.000, 0.000]),
        JointPose([0.000, -88.000, 34.000, 0.000, 54.000, 0.000]),
        JointPose([0.000, -93.659, 36.387, 0.000, 57.486, 0.000]),
        JointPose([0.000, -95.238, 42.837, 0.000, 52.615, 0.000]),
        JointPose([0.000, -88.000, 34.000, 0.000, 54.000, 0.000]),
        JointPose([0.000, -22.470, -37.850, 0.000, 60.537, 0.000]),
        JointPose([0.000, 0.000, 0.000, 0.000, 50.000, 0.000]),
    ];
    // DO8 is held on from the approach (step 2) until the retreat (step 5)
    let toggles = vec![
        IoToggle { step: 2, timing: ToggleTiming::After, channel: 8, value: true },
        IoToggle { step: 5, timing: ToggleTiming::After, channel: 8, value: false },
    ];
    MotionSequence::new("DP_01", poses, vec![50, 50, 30, 5, 2, 10, 20, 50]).with_toggles(toggles)
}

fn reaction(name: &str, poses: &[[f64; 6]]) -> MotionSequence {
    MotionSequence::new(
        name,
        poses.iter().copied().map(JointPose).collect(),
        vec![REACTION_SPEED; poses.len()],
    )
    .with_settle_ms(REACTION_SETTLE_MS)
}

fn builtin_reactions() -> Vec<MotionSequence> {
    vec![
        reaction(
            "1-A",
            &[
                [-165.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [-165.0, 19.8, 0.0, 0.0, 0.0, 0.0],
                [-165.0, -23.2, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            ],
        ),
        reaction(
            "1-B",
            &[
                [77.3, -6.0, 0.0, -29.8, 0.0, 0.0],
                [77.3, -6.0, 0.0, 47.1, 0.0, 0.0],
                [77.3, -6.0, 0.0, -31.6, 0.0, 0.0],
                [77.3, -6.0, 0.0, 36.2, 0.0, 0.0],
                [77.3, -6.0, 0.0, 36.2, 5.1, 0.0],
                [77.3, -6.0, 0.0, 36.2, -35.9, 0.0],
            ],
        ),
        reaction(
            "1-C",
            &[
                [-6.2, -16.4, 0.0, -53.3, -26.6, 0.0],
                [4.3, -16.4, 0.0, 31.9, -21.1, 0.0],
                [-9.9, -16.4, 0.0, -39.5, -21.1, 0.0],
                [12.4, -16.4, 0.0, 24.6, -21.1, 0.0],
            ],
        ),
        reaction(
            "1-D",
            &[
                [-57.5, 72.6, -50.0, 0.0, 0.0, 0.0],
                [-57.5, 72.6, -46.7, 0.0, 0.0, 0.0],
                [-57.5, 72.6, -55.0, 0.0, -19.3, 0.0],
                [-57.5, 72.6, -41.0, 0.0, -19.3, 0.0],
                [-57.5, 72.6, -55.0, 0.0, -19.3, 0.0],
            ],
        ),
        reaction(
            "2-A",
            &[
                [165.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [-165.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [-165.0, -10.8, -16.1, -37.4, 0.0, 0.0],
                [-165.0, 15.3, -16.1, -37.4, 0.0, 0.0],
                [-165.0, -6.8, -16.1, -37.4, 0.0, 0.0],
                [165.0, -6.8, -16.1, -37.4, 0.0, 0.0],
            ],
        ),
        reaction(
            "2-B",
            &[
                [165.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [-165.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [-165.0, -10.8, -16.1, -37.4, 0.0, 0.0],
                [-165.0, 15.3, -16.1, -37.4, 0.0, 0.0],
                [-165.0, 15.3, -16.1, -37.4, 0.0, 0.0],
                [-165.0, -6.8, -16.1, -37.4, 0.0, 0.0],
                [165.0, -6.8, -16.1, -37.4, 0.0, 0.0],
            ],
        ),
        reaction(
            "2-C",
            &[
                [0.0, 25.8, 33.4, 0.0, 0.0, 0.0],
                [-54.7, 25.8, 33.4, 0.0, 0.0, 0.0],
                [60.5, 25.8, 33.4, 0.0, 0.0, 0.0],
                [-48.6, 25.8, 33.4, 0.0, 0.0, 0.0],
                [0.0, 1.0, -20.5, 0.0, 0.0, 0.0],
            ],
        ),
        reaction(
            "2-D",
            &[
                [-91.1, 67.0, -21.7, -10.7, -46.7, 0.0],
                [-40.0, 67.0, -55.0, -10.7, -46.7, 0.0],
                [-108.7, 67.0, -32.0, 30.1, -46.7, 0.0],
                [-108.7, 22.2, 7.6, -19.3, -48.1, 0.0],
                [-73.2, 2.1, -22.3, -19.3, -48.1, 0.0],
            ],
        ),
        reaction(
            "3-A",
            &[
                [-165.0, 0.0, 36.6, 0.0, 0.0, 0.0],
                [-165.0, 0.0, -14.7, 0.0, 0.0, 0.0],
                [-165.0, 70.3, -55.0, 0.0, 0.0, 0.0],
                [-165.0, 2.6, 18.2, 0.0, 0.0, 0.0],
                [-165.0, 2.6, 18.2, 36.5, 0.0, 0.0],
                [-165.0, 2.6, 18.2, -30.9, 0.0, 0.0],
            ],
        ),
        reaction(
            "3-B",
            &[
                [93.9, 14.0, 0.0, 38.9, 0.0, 0.0],
                [93.9, 14.0, 0.0, -49.0, 0.0, 0.0],
                [93.9, 14.0, 0.0, 48.0, 0.0, 0.0],
                [93.9, 14.0, 0.0, -37.9, 0.0, 0.0],
                [93.9, 33.3, -48.6, 35.4, -5.1, 0.0],
            ],
        ),
        reaction(
            "3-C",
            &[
                [-12.3, 2.0, 0.0, 0.0, -52.2, 0.0],
                [-12.3, 2.0, 0.0, 0.0, -52.2, 0.0],
                [-12.3, 2.0, 0.0, 0.0, -52.2, 0.0],
                [-12.3, 2.0, -18.7, 0.0, -52.2, 0.0],
                [-12.3, 2.0, 0.4, 0.0, -52.2, 0.0],
                [-12.3, 2.0, -17.2, 0.0, -52.2, 0.0],
                [22.7, 2.0, 1.8, 0.0, -52.2, 0.0],
            ],
        ),
        reaction(
            "3-D",
            &[
                [-77.5, 53.8, -36.4, 0.0, 0.0, 0.0],
                [-35.2, 17.7, -36.4, 0.0, 0.0, 0.0],
                [-97.5, 46.4, -36.4, -46.9, 0.0, 0.0],
                [-37.9, 57.0, -36.4, 24.8, 0.0, 0.0],
            ],
        ),
        reaction(
            OVERFLOW_KEY,
            &[
                [-165.0, 34.0, -49.7, 0.0, 0.0, 0.0],
                [165.0, 34.0, -49.7, 0.0, 0.0, 0.0],
                [-22.8, 34.0, -49.7, 36.7, 0.0, 0.0],
                [32.6, 34.0, -49.7, -44.3, 0.0, 0.0],
                [-19.9, 49.8, -33.2, 0.0, 0.0, 0.0],
            ],
        ),
    ]
}
