//! Confidence scoring for CRM contact candidates.
//!
//! Scoring is a pure function over the query and one candidate; the engine
//! ranks candidates and requires the best score to clear
//! [`CONFIDENCE_THRESHOLD`] before a negotiation proceeds.

use super::collaborators::ContactCandidate;

/// Minimum score for a match the engine will act on. Exact-name, exact-email
/// and contained-name matches clear it; company or partial name-part matches
/// do not.
pub const CONFIDENCE_THRESHOLD: f64 = 0.8;

/// A candidate with its computed confidence.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: ContactCandidate,
    pub score: f64,
}

/// Additive scoring, capped at 1.0: exact full-name 1.0, query contained in
/// the name 0.8, exact email 0.9, query contained in the company 0.6, and
/// 0.4 per query word matching a name part.
pub fn score_candidate(query: &str, candidate: &ContactCandidate) -> f64 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }

    let full_name = candidate.full_name().to_lowercase();
    let mut score: f64 = 0.0;

    if !full_name.is_empty() {
        if full_name == query {
            score += 1.0;
        } else if full_name.contains(&query) {
            score += 0.8;
        }
    }

    if let Some(email) = candidate.email.as_deref() {
        if email.to_lowercase() == query {
            score += 0.9;
        }
    }

    if let Some(company) = candidate.company.as_deref() {
        if !company.is_empty() && company.to_lowercase().contains(&query) {
            score += 0.6;
        }
    }

    let first = candidate
        .first_name
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let last = candidate
        .last_name
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    for part in query.split_whitespace() {
        if (!first.is_empty() && first == part) || (!last.is_empty() && last == part) {
            score += 0.4;
        }
    }

    score.min(1.0)
}

/// All candidates scored and sorted best-first.
pub fn rank_candidates(query: &str, candidates: &[ContactCandidate]) -> Vec<ScoredCandidate> {
    let mut ranked: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|candidate| ScoredCandidate {
            candidate: candidate.clone(),
            score: score_candidate(query, candidate),
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// The best candidate, if it clears the confidence threshold.
pub fn best_match(query: &str, candidates: &[ContactCandidate]) -> Option<ScoredCandidate> {
    rank_candidates(query, candidates)
        .into_iter()
        .next()
        .filter(|scored| scored.score >= CONFIDENCE_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(first: &str, last: &str, email: &str, company: &str) -> ContactCandidate {
        ContactCandidate {
            id: "1".to_string(),
            email: Some(email.to_string()),
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            company: Some(company.to_string()),
        }
    }

    #[test]
    fn exact_full_name_scores_one() {
        let amy = candidate("Amy", "Chen", "amy@example.com", "Acme Capital");
        assert_eq!(score_candidate("amy chen", &amy), 1.0);
    }

    #[test]
    fn exact_email_clears_the_threshold() {
        let amy = candidate("Amy", "Chen", "amy@example.com", "Acme Capital");
        let score = score_candidate("amy@example.com", &amy);
        assert!(score >= CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn company_only_match_stays_below_threshold() {
        let amy = candidate("Amy", "Chen", "amy@example.com", "Acme Capital");
        let score = score_candidate("acme", &amy);
        assert!(score < CONFIDENCE_THRESHOLD, "score was {score}");
    }

    #[test]
    fn lone_first_name_clears_but_stray_words_do_not() {
        // "amy" is contained in "amy chen" (0.8) and matches the first name
        // part (0.4), capped at 1.0.
        let amy = candidate("Amy", "Chen", "amy@example.com", "Acme Capital");
        assert!(score_candidate("amy", &amy) >= CONFIDENCE_THRESHOLD);

        // A query matching only one name part, not contained in the full
        // name, stays below.
        let bob = candidate("Robert", "Smith", "bob@example.com", "");
        assert!(score_candidate("smith jones", &bob) < CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn ranking_puts_the_strongest_candidate_first() {
        let candidates = vec![
            candidate("Bob", "Chen", "bob.chen@example.com", ""),
            candidate("Amy", "Chen", "amy.chen@example.com", ""),
        ];
        let ranked = rank_candidates("amy chen", &candidates);
        assert_eq!(
            ranked[0].candidate.email.as_deref(),
            Some("amy.chen@example.com")
        );
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn best_match_requires_the_threshold() {
        let weak = vec![candidate("Robert", "Smith", "bob@example.com", "Acme")];
        assert!(best_match("jones", &weak).is_none());

        let strong = vec![candidate("Amy", "Chen", "amy@example.com", "")];
        let matched = best_match("Amy Chen", &strong).expect("should match");
        assert_eq!(matched.candidate.id, "1");
    }
}
