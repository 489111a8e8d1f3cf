//! Per-utterance turn context

use std::time::Instant;

/// A knowledge chunk returned by the retrieval engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub source_id: String,
    /// Relevance score in [0, 1].
    pub score: f32,
    /// Position after ranking, 0-based.
    pub rank: usize,
}

/// Sort chunks by score descending, ties broken by lexicographic source_id,
/// and assign ranks.
pub fn rank_chunks(mut chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    for (rank, chunk) in chunks.iter_mut().enumerate() {
        chunk.rank = rank;
    }
    chunks
}

/// State accumulated over one user-utterance / assistant-response cycle.
///
/// A turn transitions through CAPTURING -> THINKING -> SPEAKING exactly once,
/// or is aborted by an interruption; it is never revisited.
#[derive(Debug)]
pub struct TurnContext {
    /// Monotonic per session.
    pub turn_id: u64,
    /// The user's final transcript.
    pub user_text: String,
    /// Chunks retrieved for this turn, in rank order.
    pub retrieved_chunks: Vec<RetrievedChunk>,
    /// Assistant text accumulated as fragments are handed to TTS.
    pub assistant_text: String,
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
}

impl TurnContext {
    pub fn new(turn_id: u64) -> Self {
        Self {
            turn_id,
            user_text: String::new(),
            retrieved_chunks: Vec::new(),
            assistant_text: String::new(),
            started_at: Instant::now(),
            ended_at: None,
        }
    }

    /// Record a text fragment that was actually handed to TTS.
    pub fn push_assistant_fragment(&mut self, fragment: &str) {
        self.assistant_text.push_str(fragment);
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source_id: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            text: format!("chunk from {source_id}"),
            source_id: source_id.to_string(),
            score,
            rank: 0,
        }
    }

    #[test]
    fn test_rank_by_score_descending() {
        let ranked = rank_chunks(vec![chunk("a", 0.2), chunk("b", 0.9), chunk("c", 0.5)]);
        let ids: Vec<&str> = ranked.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        assert_eq!(ranked[0].rank, 0);
        assert_eq!(ranked[2].rank, 2);
    }

    #[test]
    fn test_score_ties_break_lexicographically() {
        let ranked = rank_chunks(vec![chunk("zeta", 0.5), chunk("alpha", 0.5)]);
        assert_eq!(ranked[0].source_id, "alpha");
        assert_eq!(ranked[1].source_id, "zeta");
    }
}
