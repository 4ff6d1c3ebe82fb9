//! Prompt templates for the four LLM-backed stages.

pub fn research(topic: &str) -> String {
    format!(
        "You are a research specialist. Gather key information about: {topic}\n\
         \n\
         Provide 3-5 key points that would be valuable for a blog post.\n\
         Focus on current trends, benefits, and real-world applications."
    )
}

/// Draft prompt. On a revision pass the reviewer's previous feedback is
/// appended so the writer can address it.
pub fn write(topic: &str, research_notes: &str, feedback: Option<&str>) -> String {
    let mut prompt = format!(
        "You are a content writer. Create a blog post draft about: {topic}\n\
         \n\
         Research notes:\n\
         {research_notes}\n\
         \n\
         Write an engaging 300-word blog post with:\n\
         - Catchy introduction\n\
         - Key points from research\n\
         - Practical examples\n\
         - Strong conclusion"
    );
    if let Some(feedback) = feedback.filter(|f| !f.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n\nA reviewer rejected the previous version with this feedback:\n\
             {feedback}\n\
             \n\
             Address every point in the new draft."
        ));
    }
    prompt
}

pub fn edit(draft: &str) -> String {
    format!(
        "You are a professional editor. Refine this blog post draft:\n\
         \n\
         {draft}\n\
         \n\
         Improve:\n\
         - Clarity and flow\n\
         - Grammar and style\n\
         - Engagement and readability\n\
         \n\
         Return the polished version."
    )
}

pub fn quality_check(final_content: &str) -> String {
    format!(
        "You are a quality assurance specialist. Review the following blog post for \
         accuracy, coherence, and overall quality:\n\
         \n\
         {final_content}\n\
         \n\
         Provide a score from 1-10 (10 being the best) and feedback for improvements.\n\
         Respond with ONLY a JSON object with two keys: \"score\" (an integer) and \
         \"feedback\" (a string)."
    )
}
