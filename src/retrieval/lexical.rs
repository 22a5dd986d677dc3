//! Lexical backend: the inverted-index engine run as a child process.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{expand_path, LexicalConfig};
use crate::error::RetrievalError;
use crate::metrics::get_metrics;

use super::{
    assign_ranks, check_request, parse_engine_output, Candidate, RetrievalBackend, RetrievalMode,
    SourceBackend,
};

/// Runs the engine as
/// `<executable> <index> <lexicon> <collection> <query> <1|0>`
/// and parses its stdout.
pub struct LexicalBackend {
    executable: PathBuf,
    index_path: PathBuf,
    lexicon_path: PathBuf,
    collection_path: PathBuf,
}

impl LexicalBackend {
    /// Create a lexical backend from configuration.
    pub fn new(config: &LexicalConfig) -> Self {
        Self {
            executable: expand_path(&config.executable),
            index_path: expand_path(&config.index_path),
            lexicon_path: expand_path(&config.lexicon_path),
            collection_path: expand_path(&config.collection_path),
        }
    }

    fn command(&self, query: &str, flag: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(&self.index_path)
            .arg(&self.lexicon_path)
            .arg(&self.collection_path)
            .arg(query)
            .arg(flag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RetrievalBackend for LexicalBackend {
    async fn retrieve(
        &self,
        query: &str,
        mode: RetrievalMode,
        limit: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        check_request(query, limit)?;
        let flag = mode
            .lexical_flag()
            .ok_or_else(|| RetrievalError::UnsupportedMode(mode.to_string()))?;

        let output = self.command(query, flag).output().await.map_err(|e| {
            RetrievalError::BackendUnreachable(format!(
                "failed to run {}: {}",
                self.executable.display(),
                e
            ))
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(RetrievalError::BackendProtocolError(format!(
                "engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if !stderr.trim().is_empty() {
            tracing::warn!(backend = "lexical", stderr = %stderr.trim(), "Engine wrote to stderr");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = parse_engine_output(&stdout);

        for bad in &report.malformed {
            tracing::warn!(
                backend = "lexical",
                line = bad.line_number,
                reason = %bad.reason,
                "Dropping malformed engine record"
            );
        }
        get_metrics().record_malformed("lexical", report.malformed.len());

        if !report.is_recognized() {
            return Err(RetrievalError::BackendProtocolError(format!(
                "unrecognised engine output ({} bytes, {} malformed records)",
                output.stdout.len(),
                report.malformed.len()
            )));
        }

        tracing::debug!(
            backend = "lexical",
            records = report.records.len(),
            dropped = report.malformed.len(),
            "Parsed engine output"
        );

        Ok(assign_ranks(
            SourceBackend::Lexical,
            report
                .records
                .into_iter()
                .map(|r| (r.doc_id, r.score, r.passage)),
            limit,
        ))
    }

    fn name(&self) -> &str {
        "lexical"
    }

    fn supports(&self, mode: RetrievalMode) -> bool {
        mode.uses_lexical()
    }
}
