//! Prompt text for the mentor services

use crate::model::{AppState, DailyCheckIn, Language, Priority};

/// System instruction for realtime voice sessions
pub fn voice_instruction(language: Language) -> String {
    format!(
        "You are the DailyFlow Mentor. Be encouraging, use behavioral psychology \
         (BJ Fogg, James Clear) and help the user stay focused and foster healthy habits. \
         Respond in {}.",
        language.prompt_name()
    )
}

pub fn energy_label(level: Option<u8>) -> &'static str {
    match level {
        Some(1) => "Low",
        Some(2) => "Medium",
        _ => "High",
    }
}

pub fn mood_label(level: Option<u8>) -> &'static str {
    match level {
        Some(1) => "Tense/Sad",
        Some(2) => "Neutral",
        _ => "Excellent",
    }
}

fn priority_label(priority: Option<Priority>) -> &'static str {
    match priority.unwrap_or_default() {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
    }
}

/// One line per task: block, title, priority, notes and completion
pub fn tasks_summary(state: &AppState) -> String {
    state
        .tasks
        .iter()
        .map(|t| {
            let notes = t
                .notes
                .as_deref()
                .map(|n| format!(" (Notes: {})", n))
                .unwrap_or_default();
            format!(
                "- [{:?}] {} (Priority: {}){} - {}",
                t.block,
                t.title,
                priority_label(t.priority),
                notes,
                if t.completed { "Completed" } else { "Pending" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn routine_prompt(
    state: &AppState,
    check_in: Option<&DailyCheckIn>,
    language: Language,
) -> String {
    let habits = serde_json::to_string(&state.habits).unwrap_or_else(|_| "[]".to_string());
    let note = check_in
        .and_then(|c| c.note.as_deref())
        .map(|n| format!("User note: {}\n", n))
        .unwrap_or_default();

    format!(
        "You are a productivity mentor and behavioral psychologist.\n\
         Analyze the user's current state and suggest dynamic adjustments to the routine.\n\n\
         User energy: {energy}\n\
         Mood: {mood}\n\
         {note}\n\
         Today's tasks:\n\
         {tasks}\n\n\
         Rules:\n\
         1. If energy is LOW (1), suggest deferring high priority or complex tasks to tomorrow \
         or moving them to the period of highest energy.\n\
         2. Identify habit stacking opportunities between the listed tasks and the habits: {habits}.\n\
         3. Respond in {language}.\n\n\
         Return valid JSON.",
        energy = energy_label(check_in.map(|c| c.energy)),
        mood = mood_label(check_in.map(|c| c.mood)),
        note = note,
        tasks = tasks_summary(state),
        habits = habits,
        language = language.prompt_name(),
    )
}

/// Tasks, habits and check-ins as a compact JSON object
fn state_data(state: &AppState) -> String {
    serde_json::json!({
        "tasks": state.tasks,
        "habits": state.habits,
        "checkIns": state.check_ins,
    })
    .to_string()
}

pub fn weekly_report_prompt(state: &AppState, language: Language) -> String {
    format!(
        "Analyze the user's weekly progress based on recent tasks, habits and check-ins.\n\
         Data: {data}\n\n\
         Produce 3 valuable insights as a JSON array:\n\
         1. Motivational: based on current progress or wins.\n\
         2. Adjustment: a suggestion to improve or simplify the routine.\n\
         3. Progress: an objective observation about habit consistency.\n\n\
         Respond in {language}.",
        data = state_data(state),
        language = language.prompt_name(),
    )
}

pub fn strategy_prompt(state: &AppState, language: Language) -> String {
    format!(
        "Analyze the user's complete system. Use search grounding to understand modern \
         productivity trends that apply to this profile.\n\
         Data: {data}\n\n\
         Provide a deep, personalized strategic analysis of how to optimize workflow and \
         mental well-being.\n\
         Respond in {language}.",
        data = state_data(state),
        language = language.prompt_name(),
    )
}

/// Returned when the strategy model produced no text
pub fn strategy_empty_fallback(language: Language) -> &'static str {
    match language {
        Language::Pt => "Sem análise disponível no momento.",
        Language::En => "No strategic analysis available at this time.",
    }
}

/// Returned when the strategy request failed
pub fn strategy_error_fallback(language: Language) -> &'static str {
    match language {
        Language::Pt => "Erro na análise profunda estratégica.",
        Language::En => "Strategy analysis error.",
    }
}
