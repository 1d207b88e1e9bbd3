//! Flatten agent markdown into blocks the UI can lay out.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading(u8, String),
    Paragraph(String),
    Code { lang: Option<String>, text: String },
    Item { depth: usize, ordinal: Option<u64>, text: String },
    Quote(String),
    Rule,
}

fn heading_size(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

pub fn parse(markdown: &str) -> Vec<Block> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let mut blocks = Vec::new();
    let mut text = String::new();
    // one entry per open list: next ordinal for ordered lists
    let mut lists: Vec<Option<u64>> = Vec::new();
    let mut code_lang: Option<Option<String>> = None;
    let mut in_quote = false;

    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(Tag::List(start)) => {
                flush_item(&mut blocks, &mut text, &lists);
                lists.push(start);
            }
            Event::End(Tag::List(_)) => {
                lists.pop();
            }
            Event::Start(Tag::Item) => flush_item(&mut blocks, &mut text, &lists),
            Event::End(Tag::Item) => {
                flush_item(&mut blocks, &mut text, &lists);
                if let Some(Some(n)) = lists.last_mut() {
                    *n += 1;
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                flush_item(&mut blocks, &mut text, &lists);
                code_lang = Some(match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                    _ => None,
                });
            }
            Event::End(Tag::CodeBlock(_)) => {
                let lang = code_lang.take().flatten();
                blocks.push(Block::Code {
                    lang,
                    text: std::mem::take(&mut text).trim_end().to_string(),
                });
            }
            Event::Start(Tag::BlockQuote) => in_quote = true,
            Event::End(Tag::BlockQuote) => {
                in_quote = false;
                let quote = std::mem::take(&mut text);
                if !quote.trim().is_empty() {
                    blocks.push(Block::Quote(quote.trim().to_string()));
                }
            }
            Event::End(Tag::Heading(level, _, _)) => {
                blocks.push(Block::Heading(heading_size(level), std::mem::take(&mut text)));
            }
            Event::End(Tag::Paragraph) => {
                if in_quote {
                    text.push('\n');
                } else if lists.is_empty() {
                    let paragraph = std::mem::take(&mut text);
                    if !paragraph.is_empty() {
                        blocks.push(Block::Paragraph(paragraph));
                    }
                }
            }
            Event::End(Tag::TableCell) => text.push_str(" | "),
            Event::End(Tag::TableRow) | Event::End(Tag::TableHead) => {
                let row = std::mem::take(&mut text);
                blocks.push(Block::Paragraph(row.trim_end_matches(" | ").to_string()));
            }
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            Event::Rule => blocks.push(Block::Rule),
            _ => {}
        }
    }

    if !text.trim().is_empty() {
        blocks.push(Block::Paragraph(text.trim().to_string()));
    }
    blocks
}

fn flush_item(blocks: &mut Vec<Block>, text: &mut String, lists: &[Option<u64>]) {
    if lists.is_empty() || text.trim().is_empty() {
        return;
    }
    blocks.push(Block::Item {
        depth: lists.len() - 1,
        ordinal: lists.last().copied().flatten(),
        text: std::mem::take(text).trim().to_string(),
    });
}
