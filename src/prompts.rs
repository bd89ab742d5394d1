//! Prompt templates sent to the transcription service.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing transcription behaviour (table
//!    handling, exercise markup) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without a
//!    live API call, so prompt regressions are caught cheaply.
//!
//! The templates are an enumerated, closed set: callers pick a
//! [`PromptKind`] at submission and cannot inject arbitrary prompt text.

use std::fmt;
use std::str::FromStr;

/// Which transcription template to use for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptKind {
    /// Faithful plain-text transcription; math wrapped in `$…$`. (default)
    #[default]
    PlainText,
    /// Plain text plus restructuring of multiple-choice exercises into
    /// `ex_test`-style LaTeX environments.
    StructuredExercise,
}

impl PromptKind {
    /// The full template text sent alongside the document.
    pub fn template(&self) -> &'static str {
        match self {
            PromptKind::PlainText => PLAIN_TEXT_PROMPT,
            PromptKind::StructuredExercise => STRUCTURED_EXERCISE_PROMPT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::PlainText => "plain_text",
            PromptKind::StructuredExercise => "structured_exercise",
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PromptKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain_text" => Ok(PromptKind::PlainText),
            "structured_exercise" => Ok(PromptKind::StructuredExercise),
            _ => Err(format!("unknown prompt kind: {}", s)),
        }
    }
}

/// Faithful transcription: reproduce the document's text exactly, with all
/// mathematics as LaTeX delimited by `$`.
pub const PLAIN_TEXT_PROMPT: &str = r#"
Hãy nhận diện và gõ lại [CHÍNH XÁC] PDF thành văn bản, tất cả công thức Toán Latex, bọc trong dấu $
[TUYỆT ĐỐI] không thêm nội dung khác ngoài nội dung PDF, [CHỈ ĐƯỢC PHÉP] gõ lại nội dung PDF thành văn bản.
"#;

/// Transcription plus restructuring: tables become `tabular` environments,
/// multiple-choice questions become `ex_test` blocks, worked exercises
/// become `bt` blocks.
pub const STRUCTURED_EXERCISE_PROMPT: &str = r#"
Hãy nhận diện và gõ lại [CHÍNH XÁC] PDF thành văn bản, tất cả công thức Toán Latex, bọc trong dấu $
[TUYỆT ĐỐI] không thêm nội dung khác ngoài nội dung PDF, [CHỈ ĐƯỢC PHÉP] gõ lại nội dung PDF thành văn bản.
1. Chuyển bảng (table) thông thường sang cấu trúc như này cho tôi, còn bảng biến thiên thì không chuyển
\begin{tabular}{|c|c|c|c|c|c|}
\hline$x$ & -2 & -1 & 0 & 1 & 2 \\
\hline$y=x^2$ & 4 & 1 & 0 & 1 & 4 \\
\hline
\end{tabular}
2. Hãy bỏ cấu trúc in đậm của Markdown trong kết quả (bỏ dấu *)
3. Chuyển nội dung văn bản trong file sang cấu trúc Latex với câu hỏi trắc nghiệm
3.1 Câu hỏi trắc nghiệm không lời giải (bắt đầu là Câu 1. hoặc Câu 1:) sẽ chuyển như sau:
Câu 1: Với $x$ là số thực dương tùy ý, $x \sqrt{x^{5}}$ bằng
A. $x^{\frac{2}{3}}$.
B. $x^{3}$.
C. $x^{\frac{7}{2}}$.
D. $x^{\frac{3}{5}}$.
Câu hỏi sau khi chuyển sang câu hỏi trắc nghiệm theo cấu trúc ex_test như sau:
\begin{ex}%Câu 1
 Với $x$ là số thực dương tùy ý, $x \sqrt{x^5}$ bằng
\choice
{ $x^{\dfrac{2}{3}}$}
{ $x^3$}
{ $x^{\dfrac{7}{2}}$}
{ $x^{\dfrac{3}{5}}$}
\end{ex}
3.2 Câu hỏi trắc nghiệm có lời giải (bắt đầu là Câu 1. hoặc Câu 1:) sẽ chuyển như sau:
\begin{ex} % Câu 1.
Hàm số nào dưới đây có bảng biến thiên như sau
\choice
{\True $\dfrac{x+2}{x-1}$}
{ $\dfrac{-x+2}{x-1}$}
{ $\dfrac{x+2}{x+1}$}
{ $\dfrac{x-2}{x-1}$}
\loigiai{
Quan sát bảng biến thiên ta thấy:\\
}
\end{ex}
4. Chuyển nội dung văn bản trong file sang cấu trúc Latex với bài tập tự luận
\begin{bt} % Bài 1.
Tìm 2 số $ x$ và $ y$ biết: $\dfrac{x}{6}=\dfrac{y}{7}$ và $ x+y=26$.
\loigiai{
Áp dụng tính chất dãy tỉ số bằng nhau, ta có: $\dfrac{x}{6}=\dfrac{y}{7}=\dfrac{x+y}{6+7}=\dfrac{26}{13}=2$
}
\end{bt}
"#;
