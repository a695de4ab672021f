//! Built-in flows shipped with the engine.

use std::collections::BTreeMap;

use super::definition::{FlowConfig, StageConfig};

fn stage(
    stage_id: &str,
    name: &str,
    system_prompt: &str,
    next_stages: &[&str],
    criteria: &[(&str, &str)],
    max_turns: u32,
) -> StageConfig {
    StageConfig {
        stage_id: stage_id.to_string(),
        name: name.to_string(),
        system_prompt: system_prompt.to_string(),
        user_prompt: None,
        next_stages: next_stages.iter().map(|s| s.to_string()).collect(),
        completion_criteria: criteria
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        max_turns,
    }
}

fn assemble(
    flow_id: &str,
    name: &str,
    description: &str,
    initial_stage: &str,
    stages: Vec<StageConfig>,
) -> FlowConfig {
    let stages: BTreeMap<String, StageConfig> = stages
        .into_iter()
        .map(|s| (s.stage_id.clone(), s))
        .collect();
    FlowConfig {
        flow_id: flow_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        initial_stage: initial_stage.to_string(),
        stages,
    }
}

/// Customer support: greeting → problem identification → solution or
/// escalation → resolution (which may loop back) → closing.
pub fn customer_support() -> FlowConfig {
    assemble(
        "customer_support",
        "Customer Support Conversation",
        "A structured flow for handling customer support inquiries",
        "greeting",
        vec![
            stage(
                "greeting",
                "Greeting",
                "You are a customer support agent. Greet the customer warmly and ask how \
                 you can help today. Stay polite, professional and empathetic.",
                &["problem_identification"],
                &[],
                2,
            ),
            stage(
                "problem_identification",
                "Problem Identification",
                "Ask targeted questions to understand the customer's issue: when it \
                 started, what they were doing when it happened, and any error messages \
                 they saw. Understand the problem fully before proposing solutions.",
                &["solution_proposal", "escalation"],
                &[
                    (
                        "problem_understanding",
                        "The user has provided enough details about their problem",
                    ),
                    (
                        "severity_assessment",
                        "The severity/urgency of the problem is clear",
                    ),
                ],
                4,
            ),
            stage(
                "solution_proposal",
                "Solution Proposal",
                "Suggest one or more solutions for the identified problem. Explain them \
                 clearly, walk the customer through any steps, and check whether the \
                 solution worked.",
                &["resolution_confirmation", "escalation"],
                &[
                    ("solution_provided", "At least one solution has been suggested"),
                    (
                        "customer_understanding",
                        "The customer understands the proposed solution",
                    ),
                ],
                5,
            ),
            stage(
                "resolution_confirmation",
                "Resolution Confirmation",
                "Confirm with the customer that the issue is resolved and ask whether \
                 there is anything else you can help with. Thank them if they are \
                 satisfied.",
                &["closing", "problem_identification"],
                &[
                    (
                        "problem_resolved",
                        "The customer confirms their problem is resolved",
                    ),
                    (
                        "satisfaction_confirmed",
                        "The customer expresses satisfaction with the solution",
                    ),
                ],
                3,
            ),
            stage(
                "escalation",
                "Escalation",
                "The issue needs a specialist. Explain that you are escalating it, \
                 collect any extra information the specialist will need, and tell the \
                 customer when to expect a response.",
                &["closing"],
                &[],
                3,
            ),
            stage(
                "closing",
                "Closing",
                "Thank the customer for their time and patience, give any final \
                 instructions, and explain how to get back in touch later.",
                &[],
                &[],
                2,
            ),
        ],
    )
}

/// Job interview: introduction → background → technical → behavioral →
/// candidate questions → closing.
pub fn job_interview() -> FlowConfig {
    assemble(
        "job_interview",
        "Job Interview Conversation",
        "A structured flow for conducting a job interview",
        "introduction",
        vec![
            stage(
                "introduction",
                "Introduction",
                "You are an interviewer. Introduce yourself, explain how the interview \
                 will run, and ask the candidate to briefly introduce themselves. Be \
                 professional but friendly.",
                &["background_experience"],
                &[],
                2,
            ),
            stage(
                "background_experience",
                "Background & Experience",
                "Ask about the candidate's relevant work experience, skills and \
                 education. Focus on what matters for the position and ask follow-up \
                 questions for concrete examples.",
                &["technical_questions"],
                &[
                    (
                        "experience_covered",
                        "The candidate has discussed their relevant experience",
                    ),
                    (
                        "skills_covered",
                        "The candidate has mentioned their key skills",
                    ),
                ],
                4,
            ),
            stage(
                "technical_questions",
                "Technical Questions",
                "Ask technical questions related to the position that test knowledge, \
                 problem solving and skills. Give the candidate time to think and \
                 clarify when needed.",
                &["behavioral_questions"],
                &[
                    (
                        "technical_knowledge",
                        "The candidate has demonstrated technical knowledge",
                    ),
                    (
                        "problem_solving",
                        "The candidate has shown problem-solving abilities",
                    ),
                ],
                5,
            ),
            stage(
                "behavioral_questions",
                "Behavioral Questions",
                "Ask about specific past situations that show teamwork, leadership and \
                 conflict resolution. Encourage answers in the STAR format (Situation, \
                 Task, Action, Result).",
                &["candidate_questions"],
                &[
                    (
                        "behavioral_examples",
                        "The candidate has provided specific examples of past behavior",
                    ),
                    (
                        "key_competencies",
                        "The candidate has demonstrated key competencies",
                    ),
                ],
                4,
            ),
            stage(
                "candidate_questions",
                "Candidate Questions",
                "Invite the candidate to ask about the position, company, team or work \
                 environment, and answer thoughtfully and honestly.",
                &["closing_next_steps"],
                &[],
                4,
            ),
            stage(
                "closing_next_steps",
                "Closing & Next Steps",
                "Thank the candidate, explain the next steps of the hiring process and \
                 when they will hear back, and ask for any final questions.",
                &[],
                &[],
                2,
            ),
        ],
    )
}

/// All built-in flows.
pub fn default_flows() -> Vec<FlowConfig> {
    vec![customer_support(), job_interview()]
}
