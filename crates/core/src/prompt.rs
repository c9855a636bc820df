use crate::provider::ChatMessage;
use crate::question::{Question, QuestionType};

pub const SYSTEM_PROMPT: &str = "你是一个专业的考试答题助手。请直接回答答案，不要解释。\
选择题只回答选项的内容(如：地球)；多选题用#号分隔答案,只回答选项的内容(如中国#世界#地球)；\
判断题只回答: 正确/对/true/√ 或 错误/错/false/×；填空题直接给出答案。";

fn type_hint(kind: QuestionType) -> &'static str {
    match kind {
        QuestionType::Single => "这是一道单选题。",
        QuestionType::Multiple => "这是一道多选题，答案请用#符号分隔。",
        QuestionType::Judgement => {
            "这是一道判断题，需要回答：正确/对/true/√ 或者 错误/错/false/×。"
        }
        QuestionType::Completion => "这是一道填空题。",
    }
}

/// User turn: the question, a hint for known types, the option block if any.
pub fn build_user_prompt(question: &Question) -> String {
    let mut prompt = format!("问题: {}\n", question.text);
    if let Some(kind) = question.question_type() {
        prompt.push_str(type_hint(kind));
        prompt.push('\n');
    }
    if !question.options.is_empty() {
        prompt.push_str("选项:\n");
        prompt.push_str(&question.options);
        prompt.push('\n');
    }
    prompt.push_str("请直接给出答案，不要解释。");
    prompt
}

pub fn build_messages(question: &Question) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_user_prompt(question)),
    ]
}
