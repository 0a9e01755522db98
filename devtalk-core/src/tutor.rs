//! Tutor persona and practice content shared by the live and text modes.

/// Persona for live voice practice.
pub const SYSTEM_INSTRUCTION_TUTOR: &str = "\
You are an expert English Tutor specifically for a Software Engineering student.
Your goal is to help the user improve their fluency and sentence construction in English.
The user speaks Turkish natively.

Guidelines:
1. When the user speaks in broken English, correct them gently by rephrasing their sentence naturally.
2. If the user struggles, explain the grammar concept briefly, using software engineering analogies (e.g., \"Think of the subject-verb agreement like type safety\").
3. Keep the conversation engaging. Ask about their code, their studies, or tech news.
4. If the user speaks Turkish, translate it to English and ask them to repeat it.
5. Be encouraging and patient.
";

/// Role-play situations offered in scenario mode.
pub const SCENARIOS: &[&str] = &[
    "Daily Standup Meeting",
    "Code Review Discussion",
    "Explaining a Bug to a PM",
    "Job Interview: Technical Questions",
];

/// First user turn that makes the model open the role-play.
pub const SCENARIO_KICKOFF: &str = "Start the simulation.";

/// Request for a fresh vocabulary set.
pub const VOCABULARY_PROMPT: &str = "Generate 5 advanced English vocabulary words specifically useful for software engineers (mix of technical verbs and professional adjectives). Return JSON.";

const CORRECTION_MARKER: &str = "(Correction:";

/// System instruction for a text role-play of `scenario`.
pub fn scenario_instruction(scenario: &str) -> String {
    format!(
        "You are acting as a colleague or interviewer in a {scenario}.\n\
         Your goal is to have a realistic conversation with a Junior Software Engineer (the user).\n\
         Keep your responses concise (under 50 words) to encourage back-and-forth.\n\
         After the user replies, if they make a grammar mistake, correct it inside parentheses at the end of your response like this: (Correction: ...)\n\
         Start the conversation now by asking the first question relevant to {scenario}."
    )
}

/// Look a scenario up by 1-based index or case-insensitive name prefix.
pub fn find_scenario(query: &str) -> Option<&'static str> {
    let query = query.trim();
    if let Ok(n) = query.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| SCENARIOS.get(i)).copied();
    }
    let lowered = query.to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }
    SCENARIOS
        .iter()
        .find(|s| s.to_ascii_lowercase().starts_with(&lowered))
        .copied()
}

/// Split a role-play reply into the in-character text and the trailing
/// grammar correction, if the model added one.
pub fn split_correction(text: &str) -> (&str, Option<&str>) {
    let Some(idx) = text.rfind(CORRECTION_MARKER) else {
        return (text.trim(), None);
    };
    let tail = &text[idx + CORRECTION_MARKER.len()..];
    let Some(close) = tail.rfind(')') else {
        return (text.trim(), None);
    };
    let correction = tail[..close].trim();
    if correction.is_empty() {
        return (text[..idx].trim(), None);
    }
    (text[..idx].trim(), Some(correction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_instruction_names_the_scenario_twice() {
        let text = scenario_instruction("Code Review Discussion");
        assert_eq!(text.matches("Code Review Discussion").count(), 2);
        assert!(text.contains("under 50 words"));
        assert!(text.contains("(Correction: ...)"));
    }

    #[test]
    fn scenarios_resolve_by_index_or_prefix() {
        assert_eq!(find_scenario("1"), Some("Daily Standup Meeting"));
        assert_eq!(find_scenario("job"), Some("Job Interview: Technical Questions"));
        assert_eq!(find_scenario("0"), None);
        assert_eq!(find_scenario("9"), None);
        assert_eq!(find_scenario(""), None);
    }

    #[test]
    fn trailing_correction_is_split_off() {
        let (reply, fix) = split_correction(
            "Sounds good, what blocked you yesterday? (Correction: \"I was working on\" instead of \"I working on\")",
        );
        assert_eq!(reply, "Sounds good, what blocked you yesterday?");
        assert_eq!(fix, Some("\"I was working on\" instead of \"I working on\""));
    }

    #[test]
    fn reply_without_correction_is_returned_whole() {
        assert_eq!(split_correction("  Great answer!  "), ("Great answer!", None));
        assert_eq!(split_correction("Open (Correction: never closed"), ("Open (Correction: never closed", None));
    }

    #[test]
    fn tutor_persona_mentions_native_language() {
        assert!(SYSTEM_INSTRUCTION_TUTOR.contains("Turkish"));
        assert!(SYSTEM_INSTRUCTION_TUTOR.lines().any(|l| l.starts_with("5.")));
    }
}
