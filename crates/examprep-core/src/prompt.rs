//! Chunking extracted text and filling the notes / MCQ templates.

pub const DEFAULT_CHUNK_CHARS: usize = 3000;
pub const DEFAULT_MAX_CHUNKS: usize = 4;

/// What the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudyTask {
    Notes,
    Mcqs { count: usize },
}

impl StudyTask {
    pub fn label(&self) -> &'static str {
        match self {
            StudyTask::Notes => "notes",
            StudyTask::Mcqs { .. } => "mcqs",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StudyTask::Notes => "Study Notes",
            StudyTask::Mcqs { .. } => "Multiple-Choice Questions",
        }
    }
}

/// Split `text` on whitespace into chunks of at most `max_chars` characters.
///
/// Words are never split unless a single word is longer than `max_chars`.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for word in text.split_whitespace() {
        let word_chars = word.chars().count();

        if word_chars > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_chars
        } else {
            current_chars + 1 + word_chars
        };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(word);
        current_chars += word_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Builds one prompt per action from the leading chunks of a document.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub chunk_chars: usize,
    pub max_chunks: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            chunk_chars: DEFAULT_CHUNK_CHARS,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }
}

impl PromptBuilder {
    pub fn new(chunk_chars: usize, max_chunks: usize) -> Self {
        Self {
            chunk_chars,
            max_chunks: max_chunks.max(1),
        }
    }

    /// Source material handed to the model: the first `max_chunks` chunks,
    /// separated by blank lines.
    pub fn material(&self, text: &str) -> String {
        let chunks = chunk_text(text, self.chunk_chars);
        if chunks.len() > self.max_chunks {
            tracing::debug!(
                chunks = chunks.len(),
                kept = self.max_chunks,
                "truncating material to fit one request"
            );
        }
        chunks
            .into_iter()
            .take(self.max_chunks)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn build(&self, task: StudyTask, text: &str) -> String {
        match task {
            StudyTask::Notes => self.notes_prompt(text),
            StudyTask::Mcqs { count } => self.mcq_prompt(text, count),
        }
    }

    pub fn notes_prompt(&self, text: &str) -> String {
        format!(
            "You are helping a student prepare for an exam.\n\
             Write concise, well-structured study notes from the material below.\n\
             Use headings and bullet points. Cover the key concepts, definitions \
             and important facts, and nothing that is not in the material.\n\n\
             Material:\n{}",
            self.material(text)
        )
    }

    pub fn mcq_prompt(&self, text: &str, count: usize) -> String {
        let count = count.max(1);
        format!(
            "You are helping a student prepare for an exam.\n\
             Create {count} multiple-choice questions from the material below.\n\
             For each question give four options labelled A) to D), then a line \
             \"Answer: <letter>\" and a one-line explanation.\n\
             Only ask about facts stated in the material.\n\n\
             Material:\n{}",
            self.material(text)
        )
    }
}
