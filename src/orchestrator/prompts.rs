//! Per-kind prompt text and fallback lines.

use super::ConversationContext;
use crate::types::{EmotionContext, UserInfo, UtteranceKind};
use rand::seq::SliceRandom;

const IDLE_NUDGES: &[&str] = &[
    "The learner has gone quiet. Offer one short, friendly remark that invites them back.",
    "The learner has been idle for a while. Suggest a small next step in one sentence.",
    "The learner paused. Ask, in one sentence, whether they would like a hint.",
];

/// A randomly chosen idle nudge so repeated idle remarks do not sound identical.
pub fn idle_input() -> String {
    IDLE_NUDGES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(IDLE_NUDGES[0])
        .to_string()
}

pub fn greeting_input(user: &UserInfo) -> String {
    match user.display_name.as_deref() {
        Some(name) => format!("Greet {name} at the start of the session."),
        None => "Greet the learner at the start of the session.".to_string(),
    }
}

/// Input line describing a camera reading.
pub fn emotion_input(emotion: &EmotionContext) -> String {
    let percent = (emotion.confidence * 100.0).round() as u32;
    match emotion.visual_description.as_deref() {
        Some(description) => format!(
            "The learner looks {} ({percent}% confidence): {description}",
            emotion.emotion
        ),
        None => format!(
            "The learner looks {} ({percent}% confidence).",
            emotion.emotion
        ),
    }
}

/// Full instruction text for one generation.
pub fn prompt_for(kind: UtteranceKind, input: &str, context: &ConversationContext) -> String {
    let instruction = match kind {
        UtteranceKind::Chat => {
            format!("The learner wrote: \"{input}\"\nAnswer helpfully in at most three sentences.")
        }
        UtteranceKind::Idle => input.to_string(),
        UtteranceKind::EmotionAware => {
            format!("{input}\nRespond with one short, supportive sentence. Do not mention the camera.")
        }
        UtteranceKind::Greeting => format!("{input} Keep it to one warm sentence."),
        UtteranceKind::Lesson => {
            format!("Comment briefly on this lesson content for the learner:\n{input}")
        }
        UtteranceKind::Feedback => {
            format!("Give short, encouraging feedback on the learner's answer:\n{input}")
        }
    };

    let mut notes = Vec::new();
    if context.is_in_lesson {
        notes.push("The learner is working through a lesson.");
    }
    if context.is_in_chat {
        notes.push("The chat panel is open.");
    }
    if !context.is_user_active {
        notes.push("The learner has not interacted recently.");
    }
    if notes.is_empty() {
        instruction
    } else {
        format!("{instruction}\n\n{}", notes.join(" "))
    }
}

/// Line spoken when the backend fails or returns nothing.
pub fn fallback_line(kind: UtteranceKind) -> &'static str {
    match kind {
        UtteranceKind::Chat => {
            "Sorry, I couldn't come up with an answer just now. Could you ask me again?"
        }
        UtteranceKind::Idle => "I'm here whenever you want to pick things back up.",
        UtteranceKind::EmotionAware => "Hang in there. You're doing better than you think.",
        UtteranceKind::Greeting => "Hi! I'm ready whenever you are.",
        UtteranceKind::Lesson => "Let's keep going with the lesson.",
        UtteranceKind::Feedback => "Thanks for your answer. Let's look at it together.",
    }
}
