//! Candidate sources for the refinement loop.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::core::types::{AttemptHistory, Candidate, SourceFile};

/// Inputs for producing the next candidate.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// 1-indexed attempt the candidate is for.
    pub attempt: u32,
    /// Rendered feedback from earlier failures, if any.
    pub feedback: Option<&'a str>,
    pub history: &'a AttemptHistory,
    /// Current sources of the project being updated; empty for a new project.
    pub project_files: &'a [SourceFile],
}

/// Produces candidates, one per attempt.
pub trait CandidateGenerator {
    /// `Ok(None)` means there is nothing more to try.
    fn generate(&mut self, request: &GenerationRequest<'_>) -> Result<Option<Candidate>>;
}

/// Candidates read ahead of time from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct FileCandidates {
    queue: VecDeque<Candidate>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateFile {
    Many(Vec<Candidate>),
    One(Candidate),
}

impl FileCandidates {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read candidates {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse candidates {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let candidates = match serde_json::from_str::<CandidateFile>(raw)? {
            CandidateFile::Many(list) => list,
            CandidateFile::One(candidate) => vec![candidate],
        };
        if candidates.is_empty() {
            bail!("candidate list is empty");
        }
        Ok(Self {
            queue: candidates.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl CandidateGenerator for FileCandidates {
    fn generate(&mut self, request: &GenerationRequest<'_>) -> Result<Option<Candidate>> {
        let next = self.queue.pop_front();
        debug!(
            attempt = request.attempt,
            has_feedback = request.feedback.is_some(),
            project_files = request.project_files.len(),
            found = next.is_some(),
            "next file candidate"
        );
        Ok(next)
    }
}
