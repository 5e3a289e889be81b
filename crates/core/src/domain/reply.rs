//! Interactive reply model and the provider's interactive-message limits.
//!
//! Replies are normalized before they reach the transport: excess buttons or
//! rows are dropped and long titles are truncated on character boundaries.

use serde::{Deserialize, Serialize};

pub const MAX_BUTTONS: usize = 3;
pub const MAX_BUTTON_TITLE: usize = 20;
pub const MAX_LIST_ROWS: usize = 10;
pub const MAX_LIST_SECTIONS: usize = 10;
pub const MAX_ROW_TITLE: usize = 24;
pub const MAX_ROW_DESCRIPTION: usize = 72;
pub const MAX_SECTION_TITLE: usize = 24;
pub const MAX_LIST_BUTTON_LABEL: usize = 20;
pub const MAX_BODY: usize = 1024;
pub const MAX_HEADER_FOOTER: usize = 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

impl ReplyButton {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self { id: id.into(), title: title.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractiveReply {
    Buttons {
        body: String,
        header: Option<String>,
        footer: Option<String>,
        buttons: Vec<ReplyButton>,
    },
    List {
        body: String,
        header: Option<String>,
        footer: Option<String>,
        button_label: String,
        sections: Vec<ListSection>,
    },
}

impl InteractiveReply {
    pub fn buttons(body: impl Into<String>, buttons: Vec<ReplyButton>) -> Self {
        Self::Buttons { body: body.into(), header: None, footer: None, buttons }
    }

    pub fn list(
        body: impl Into<String>,
        button_label: impl Into<String>,
        sections: Vec<ListSection>,
    ) -> Self {
        Self::List {
            body: body.into(),
            header: None,
            footer: None,
            button_label: button_label.into(),
            sections,
        }
    }

    pub fn with_footer(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Buttons { footer, .. } | Self::List { footer, .. } => *footer = Some(value.into()),
        }
        self
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Buttons { body, .. } | Self::List { body, .. } => body,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buttons { .. } => "buttons",
            Self::List { .. } => "list",
        }
    }

    /// Clamps the reply to provider limits.
    ///
    /// Rows are counted across all sections; sections left empty after the
    /// row budget runs out are dropped.
    pub fn normalized(self) -> Self {
        match self {
            Self::Buttons { body, header, footer, buttons } => Self::Buttons {
                body: truncate(&body, MAX_BODY),
                header: header.map(|value| truncate(&value, MAX_HEADER_FOOTER)),
                footer: footer.map(|value| truncate(&value, MAX_HEADER_FOOTER)),
                buttons: buttons
                    .into_iter()
                    .take(MAX_BUTTONS)
                    .map(|button| ReplyButton {
                        title: truncate(&button.title, MAX_BUTTON_TITLE),
                        id: button.id,
                    })
                    .collect(),
            },
            Self::List { body, header, footer, button_label, sections } => {
                let mut remaining = MAX_LIST_ROWS;
                let sections = sections
                    .into_iter()
                    .take(MAX_LIST_SECTIONS)
                    .filter_map(|section| {
                        let rows: Vec<ListRow> = section
                            .rows
                            .into_iter()
                            .take(remaining)
                            .map(|row| ListRow {
                                id: row.id,
                                title: truncate(&row.title, MAX_ROW_TITLE),
                                description: row
                                    .description
                                    .map(|value| truncate(&value, MAX_ROW_DESCRIPTION)),
                            })
                            .collect();
                        remaining -= rows.len();
                        (!rows.is_empty()).then(|| ListSection {
                            title: truncate(&section.title, MAX_SECTION_TITLE),
                            rows,
                        })
                    })
                    .collect();

                Self::List {
                    body: truncate(&body, MAX_BODY),
                    header: header.map(|value| truncate(&value, MAX_HEADER_FOOTER)),
                    footer: footer.map(|value| truncate(&value, MAX_HEADER_FOOTER)),
                    button_label: truncate(&button_label, MAX_LIST_BUTTON_LABEL),
                    sections,
                }
            }
        }
    }

    /// Plain-text rendering used when the interactive send fails.
    pub fn flatten_text(&self) -> String {
        let mut lines = Vec::new();
        match self {
            Self::Buttons { body, header, footer, buttons } => {
                if let Some(header) = header {
                    lines.push(format!("*{header}*"));
                }
                lines.push(body.clone());
                if !buttons.is_empty() {
                    lines.push(String::new());
                    for (index, button) in buttons.iter().enumerate() {
                        lines.push(format!("{}. {}", index + 1, button.title));
                    }
                }
                if let Some(footer) = footer {
                    lines.push(String::new());
                    lines.push(footer.clone());
                }
            }
            Self::List { body, header, footer, sections, .. } => {
                if let Some(header) = header {
                    lines.push(format!("*{header}*"));
                }
                lines.push(body.clone());
                for section in sections {
                    lines.push(String::new());
                    lines.push(format!("*{}*", section.title));
                    for row in &section.rows {
                        match &row.description {
                            Some(description) => {
                                lines.push(format!("• {} - {}", row.title, description))
                            }
                            None => lines.push(format!("• {}", row.title)),
                        }
                    }
                }
                if let Some(footer) = footer {
                    lines.push(String::new());
                    lines.push(footer.clone());
                }
            }
        }
        lines.join("\n")
    }

    pub fn option_count(&self) -> usize {
        match self {
            Self::Buttons { buttons, .. } => buttons.len(),
            Self::List { sections, .. } => sections.iter().map(|section| section.rows.len()).sum(),
        }
    }
}

/// Truncates to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::{
        truncate, InteractiveReply, ListRow, ListSection, ReplyButton, MAX_BUTTON_TITLE,
        MAX_LIST_ROWS, MAX_ROW_TITLE,
    };

    fn rows(prefix: &str, count: usize) -> Vec<ListRow> {
        (0..count)
            .map(|index| ListRow {
                id: format!("{prefix}-{index}"),
                title: format!("{prefix} item {index}"),
                description: None,
            })
            .collect()
    }

    #[test]
    fn buttons_beyond_three_are_dropped_and_titles_truncated() {
        let reply = InteractiveReply::buttons(
            "Escolha",
            vec![
                ReplyButton::new("a", "Confirmar pagamento agora mesmo"),
                ReplyButton::new("b", "Ver carrinho"),
                ReplyButton::new("c", "Cancelar"),
                ReplyButton::new("d", "Falar com atendente"),
            ],
        )
        .normalized();

        let InteractiveReply::Buttons { buttons, .. } = reply else {
            panic!("expected buttons");
        };
        assert_eq!(buttons.len(), 3);
        assert_eq!(buttons[0].title.chars().count(), MAX_BUTTON_TITLE);
        assert!(buttons[0].title.ends_with('…'));
        assert_eq!(buttons[2].id, "c");
    }

    #[test]
    fn list_rows_are_capped_across_sections() {
        let reply = InteractiveReply::list(
            "Cardápio",
            "Ver opções",
            vec![
                ListSection { title: "Massas".to_string(), rows: rows("massa", 7) },
                ListSection { title: "Molhos".to_string(), rows: rows("molho", 6) },
                ListSection { title: "Bebidas".to_string(), rows: rows("bebida", 2) },
            ],
        )
        .normalized();

        assert_eq!(reply.option_count(), MAX_LIST_ROWS);
        let InteractiveReply::List { sections, .. } = reply else {
            panic!("expected list");
        };
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].rows.len(), 3);
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let title = "Pão de queijo recheado com requeijão";
        let truncated = truncate(title, MAX_ROW_TITLE);
        assert_eq!(truncated.chars().count(), MAX_ROW_TITLE);
        assert_eq!(truncate("Açaí", MAX_ROW_TITLE), "Açaí");
    }

    #[test]
    fn flatten_text_numbers_button_options() {
        let reply = InteractiveReply::buttons(
            "Seu pedido #123456 foi criado.",
            vec![ReplyButton::new("paid", "Já paguei"), ReplyButton::new("cancel", "Cancelar")],
        )
        .with_footer("Pague com PIX");

        let text = reply.flatten_text();
        assert!(text.starts_with("Seu pedido #123456 foi criado."));
        assert!(text.contains("1. Já paguei"));
        assert!(text.contains("2. Cancelar"));
        assert!(text.ends_with("Pague com PIX"));
    }
}
