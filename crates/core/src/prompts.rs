use crate::intake::{red_flag_text, IntakeRecord};

const SYSTEM_PROMPT_TEMPLATE: &str = "You are a sports injury rehab assistant for athletes.
You provide educational guidance only and are not a medical professional.
Respond in {language}.

Priorities:
- Phased rehab plan with progression criteria.
- Risk warnings and red flags.
- Educational clinical advice (possible causes, imaging considerations).
- Return-to-sport checkpoints.

Safety:
- Do not provide definitive diagnosis or medication dosing.
- If red flags exist, lead with urgent guidance to seek in-person care.

If the user request is to conduct an interview or ask follow-up questions, output questions only and do not provide a plan yet.
Use Markdown with clear headings and concise bullets.
";

pub const FIRST_QUESTION_REQUEST: &str = "Start the interview. Based on the information provided, ask exactly one high-value follow-up question. Output only that question and do not give a treatment plan yet.";

pub const FOLLOW_UP_REQUEST: &str =
    "Continue the interview. Ask only one follow-up question and do not give a plan.";

pub const PLAN_REQUEST: &str = "Using the interview so far, produce the final phased rehabilitation plan and clinical guidance, including progression criteria for each phase, a return-to-sport checklist, and clear risk red flags.";

pub const IMAGES_OMITTED_NOTE: &str = "Note: Image inputs are omitted; provide text-only guidance.";

pub fn system_prompt(language: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE.replace("{language}", language.trim())
}

pub fn follow_up_request(answer: &str) -> String {
    format!("{FOLLOW_UP_REQUEST}\n\nUser answer: {answer}")
}

/// Final-plan request. Reported red flags put the urgent-care directive ahead
/// of every other plan instruction.
pub fn plan_request(intake: &IntakeRecord) -> String {
    let flags = intake.red_flags();
    if flags.is_empty() {
        return PLAN_REQUEST.to_string();
    }

    format!(
        "URGENT: red-flag symptoms reported ({}). Open the plan with urgent guidance to seek in-person medical care before any other content.\n\n{PLAN_REQUEST}",
        red_flag_text(&flags)
    )
}

pub fn with_images_omitted(system_prompt: &str) -> String {
    format!("{system_prompt}\n\n{IMAGES_OMITTED_NOTE}")
}
