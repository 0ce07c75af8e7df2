//! Prompts for the generative downstream stages.
//!
//! Every prompt lives here so changing a stage's behaviour means editing one
//! place, and tests can inspect the wording without a live model.
//!
//! | Stage     | System prompt               | User prompt                  |
//! |-----------|-----------------------------|------------------------------|
//! | translate | [`TRANSLATOR_SYSTEM_PROMPT`] | [`TRANSLATOR_USER_PROMPT`]   |
//! | clean     | [`CLEANER_SYSTEM_PROMPT`]    | [`cleaner_user_prompt`]      |
//! | sections  | [`SECTIONS_SYSTEM_PROMPT`]   | [`sections_user_prompt`]     |

/// Role of the page translator.
pub const TRANSLATOR_SYSTEM_PROMPT: &str = "You are a document parser and Markdown translator. \
You receive one page of a PDF document as an image and translate its content into Markdown. \
Accuracy, detail and information preservation matter more than anything else.";

/// Instructions sent alongside the page image.
pub const TRANSLATOR_USER_PROMPT: &str = r#"Translate the attached PDF page into Markdown.

1. TEXT
   - Transcribe all text content as Markdown text, in reading order

2. LISTS
   - Keep every list as a Markdown list with its original nesting and numbering

3. IMAGES
   - Replace each image with a detailed textual description of what it shows

4. TABLES
   - Convert tables to Markdown tables
   - Where cells are merged, copy the parent cell's content into each child cell
     so that no information is lost

5. WHAT TO IGNORE
   - Publisher names, logos, addresses and page numbers in headers and footers

6. OUTPUT FORMAT
   - Output ONLY the Markdown content
   - Do NOT wrap it in ```markdown fences"#;

/// Role of the master-document cleaner.
pub const CLEANER_SYSTEM_PROMPT: &str = "You are an expert Markdown editor. \
You receive one Markdown file assembled from many pages and turn it into a single, \
cohesive, consistently formatted document.";

const CLEANER_INSTRUCTIONS: &str = r#"Clean up the Markdown document below.

1. MERGE BROKEN TABLES
   - Join table headers and rows that were split by page breaks or separators
     into one correctly formatted table

2. SMOOTH FORMATTING
   - Make heading levels and list styles consistent
   - Remove line breaks in the middle of sentences caused by page breaks

3. REMOVE ARTIFACTS
   - Delete repeated page numbers, logo text, addresses and page separators
     (such as a line of '---') that are not part of the content

4. CONSOLIDATE SECTIONS
   - Smooth the transitions between sections that used to be on different pages
   - Do not add new content

Preserve as much information as possible. Only remove something when you are
certain it is noise; when in doubt, keep it.

Return ONLY the cleaned Markdown. No preamble, and no surrounding code fences
unless the content itself is a code block."#;

/// Role of the section splitter.
pub const SECTIONS_SYSTEM_PROMPT: &str = "You are a document analysis tool. \
You split a Markdown document into its logical sections based on its headers \
and answer with a valid JSON array only.";

const SECTIONS_INSTRUCTIONS: &str = r#"Split the Markdown document below into logical sections.

1. Find the main sections, usually marked by headers such as '# Title',
   '## Subtitle' or numbered headers such as '1. Introduction' or '1.1 Background'.
2. Emit one JSON object per section with exactly two keys:
   - "section": the full header title, e.g. "1.1.2 Background and Motivation"
   - "content": all Markdown under that header, up to the next header of the
     same or higher level
3. The whole answer MUST be one valid JSON array of these objects, with no
   text before or after it.

Example:
[
  {"section": "1. Introduction", "content": "Full text of the introduction..."},
  {"section": "1.1 Background", "content": "Content of the background section..."}
]"#;

/// User turn for the cleaner: instructions followed by the document.
pub fn cleaner_user_prompt(master_markdown: &str) -> String {
    wrap_document(CLEANER_INSTRUCTIONS, master_markdown)
}

/// User turn for the section splitter: instructions followed by the document.
pub fn sections_user_prompt(cleaned_markdown: &str) -> String {
    wrap_document(SECTIONS_INSTRUCTIONS, cleaned_markdown)
}

fn wrap_document(instructions: &str, document: &str) -> String {
    format!("{instructions}\n\n<document>\n{document}\n</document>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_is_embedded_after_instructions() {
        let prompt = cleaner_user_prompt("# Master\n\nBody");
        assert!(prompt.starts_with("Clean up the Markdown document below."));
        assert!(prompt.ends_with("<document>\n# Master\n\nBody\n</document>"));
    }

    #[test]
    fn sections_prompt_demands_json_array() {
        let prompt = sections_user_prompt("# A");
        assert!(prompt.contains("valid JSON array"));
        assert!(prompt.contains("\"section\""));
        assert!(prompt.contains("\"content\""));
    }
}
