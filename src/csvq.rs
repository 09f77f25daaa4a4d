use serde::{Deserialize, Serialize};

/// Maximum number of positional `option_<n>` columns recognized per row.
pub const MAX_OPTIONS: usize = 10;

const DEFAULT_DIFFICULTY: i64 = 1;
const DEFAULT_POINTS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultipleChoice,
    Text,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::SingleChoice => "single_choice",
            QuestionKind::MultipleChoice => "multiple_choice",
            QuestionKind::Text => "text",
        }
    }

    pub fn from_db(s: &str) -> Option<QuestionKind> {
        match s {
            "single_choice" => Some(QuestionKind::SingleChoice),
            "multiple_choice" => Some(QuestionKind::MultipleChoice),
            "text" => Some(QuestionKind::Text),
            _ => None,
        }
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionKind::SingleChoice | QuestionKind::MultipleChoice)
    }
}

/// One validated question row from an import file. `correct_indices` stay
/// 1-based here, matching the authored spreadsheet; the persistence layer
/// translates to 0-based option positions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvQuestionInput {
    pub content: String,
    pub question_type: QuestionKind,
    pub options: Vec<String>,
    pub correct_indices: Vec<usize>,
    pub explanation: Option<String>,
    pub difficulty: i64,
    pub points: i64,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvParseOutcome {
    pub data: Vec<CsvQuestionInput>,
    pub errors: Vec<String>,
}

/// Parse a question-bank CSV into validated rows plus a flat error list.
///
/// Never fails at the batch level: every problem becomes an entry in
/// `errors`, keyed by a 1-based row number where the header counts as row 1
/// (so the first data row is row 2, matching a spreadsheet viewer). The
/// caller decides whether a non-empty error list blocks the import.
pub fn parse_questions_csv(text: &str) -> CsvParseOutcome {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut data: Vec<CsvQuestionInput> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(e) => {
            errors.push(format!("row 1: invalid header row: {}", e));
            return CsvParseOutcome { data, errors };
        }
    };
    if headers.iter().all(|h| h.trim().is_empty()) {
        errors.push("row 1: missing header row".to_string());
        return CsvParseOutcome { data, errors };
    }

    let col = |name: &str| -> Option<usize> {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };

    let content_col = col("content");
    let type_col = col("question_type");
    let correct_col = col("correct_indices");
    let explanation_col = col("explanation");
    let difficulty_col = col("difficulty");
    let points_col = col("points");
    let tags_col = col("tags");
    let category_col = col("category");
    let image_url_col = col("image_url");
    let option_cols: Vec<Option<usize>> = (1..=MAX_OPTIONS)
        .map(|n| col(&format!("option_{}", n)))
        .collect();

    if content_col.is_none() || type_col.is_none() {
        errors.push("row 1: header must include content and question_type".to_string());
        return CsvParseOutcome { data, errors };
    }

    for (i, result) in reader.records().enumerate() {
        // Header is row 1.
        let row_no = i + 2;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                errors.push(format!("row {}: unreadable record: {}", row_no, e));
                continue;
            }
        };

        let field = |idx: Option<usize>| field_at(&record, idx);

        let Some(content) = field(content_col) else {
            errors.push(format!("row {}: missing content", row_no));
            continue;
        };

        let Some(raw_type) = field(type_col) else {
            errors.push(format!("row {}: missing question_type", row_no));
            continue;
        };
        let lowered = raw_type.to_ascii_lowercase();
        let kind = if lowered.contains("single") {
            QuestionKind::SingleChoice
        } else if lowered.contains("multi") {
            QuestionKind::MultipleChoice
        } else if lowered.contains("text") {
            QuestionKind::Text
        } else {
            errors.push(format!(
                "row {}: unrecognized question_type '{}'",
                row_no, raw_type
            ));
            continue;
        };

        let options: Vec<String> = option_cols
            .iter()
            .filter_map(|c| field(*c))
            .map(|s| s.to_string())
            .collect();

        let mut correct_indices: Vec<usize> = Vec::new();
        if kind.is_choice() {
            if options.len() < 2 {
                errors.push(format!(
                    "row {}: choice questions need at least 2 options (found {})",
                    row_no,
                    options.len()
                ));
                continue;
            }

            let Some(raw_correct) = field(correct_col) else {
                errors.push(format!("row {}: missing correct_indices", row_no));
                continue;
            };

            // Any bad token rejects the whole row, but every bad token is
            // reported so the author can fix the file in one pass.
            let mut bad_token = false;
            for token in raw_correct.split(|c| c == '|' || c == ',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                match token.parse::<usize>() {
                    Ok(n) if (1..=options.len()).contains(&n) => {
                        if !correct_indices.contains(&n) {
                            correct_indices.push(n);
                        }
                    }
                    _ => {
                        bad_token = true;
                        errors.push(format!(
                            "row {}: correct index '{}' is not in 1..{}",
                            row_no,
                            token,
                            options.len()
                        ));
                    }
                }
            }
            if bad_token {
                continue;
            }
            if correct_indices.is_empty() {
                errors.push(format!("row {}: no valid correct index", row_no));
                continue;
            }
        }

        let difficulty = field(difficulty_col)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(DEFAULT_DIFFICULTY);
        let points = field(points_col)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(DEFAULT_POINTS);

        let tags: Vec<String> = field(tags_col)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(|t| t.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let (options, correct_indices) = if kind.is_choice() {
            (options, correct_indices)
        } else {
            // Text questions carry no options regardless of stray cells.
            (Vec::new(), Vec::new())
        };

        data.push(CsvQuestionInput {
            content: content.to_string(),
            question_type: kind,
            options,
            correct_indices,
            explanation: field(explanation_col).map(|s| s.to_string()),
            difficulty,
            points,
            tags,
            category: field(category_col).map(|s| s.to_string()),
            image_url: field(image_url_col).map(|s| s.to_string()),
        });
    }

    CsvParseOutcome { data, errors }
}

fn field_at<'r>(record: &'r csv::StringRecord, idx: Option<usize>) -> Option<&'r str> {
    idx.and_then(|c| record.get(c))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "content,question_type,option_1,option_2,option_3,option_4,correct_indices,explanation,difficulty,points,tags,category,image_url";

    fn parse_lines(rows: &[&str]) -> CsvParseOutcome {
        let mut text = String::from(HEADER);
        for r in rows {
            text.push('\n');
            text.push_str(r);
        }
        parse_questions_csv(&text)
    }

    #[test]
    fn single_choice_token_matches_by_substring_any_case() {
        for token in ["single", "Single", "SINGLE_CHOICE", "single choice"] {
            let row = format!("What is 2+2?,{},3,4,,,2,,,,,,", token);
            let out = parse_lines(&[row.as_str()]);
            assert_eq!(out.errors, Vec::<String>::new());
            assert_eq!(out.data.len(), 1);
            assert_eq!(out.data[0].question_type, QuestionKind::SingleChoice);
        }
    }

    #[test]
    fn one_option_single_choice_is_rejected() {
        let out = parse_lines(&["Pick one,single,only,,,,1,,,,,,"]);
        assert!(out.data.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].contains("row 2"));
        assert!(out.errors[0].contains("at least 2 options"));
    }

    #[test]
    fn out_of_range_index_rejects_row() {
        // 4 options, indices "2|5": one error for 5, and the row is dropped
        // even though 2 on its own would be valid.
        let out = parse_lines(&["Q,multi,a,b,c,d,2|5,,,,,,"]);
        assert!(out.data.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].contains("'5'"));
        assert!(out.errors[0].contains("1..4"));
    }

    #[test]
    fn every_bad_token_is_reported() {
        let out = parse_lines(&["Q,multi,a,b,,,0|x|9,,,,,,"]);
        assert!(out.data.is_empty());
        assert_eq!(out.errors.len(), 3);
    }

    #[test]
    fn zero_valid_indices_is_its_own_error() {
        let out = parse_lines(&["Q,single,a,b,,,|,,,,,,"]);
        assert!(out.data.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].contains("no valid correct index"));
    }

    #[test]
    fn comma_delimited_indices_round_trip() {
        let out = parse_lines(&["Q,multi,a,b,c,d,\"1,3\",,,,,,"]);
        assert_eq!(out.errors, Vec::<String>::new());
        assert_eq!(out.data[0].correct_indices, vec![1, 3]);
    }

    #[test]
    fn missing_content_and_type_short_circuit_one_error_each() {
        let out = parse_lines(&[
            ",single,a,b,,,1,,,,,,",
            "Q,,a,b,,,1,,,,,,",
            "Q,essay,,,,,,,,,,,",
        ]);
        assert!(out.data.is_empty());
        assert_eq!(out.errors.len(), 3);
        assert!(out.errors[0].contains("row 2: missing content"));
        assert!(out.errors[1].contains("row 3: missing question_type"));
        assert!(out.errors[2].contains("row 4: unrecognized question_type 'essay'"));
    }

    #[test]
    fn numeric_fields_default_silently() {
        let out = parse_lines(&["Q,single,a,b,,,1,,not-a-number,,,,"]);
        assert_eq!(out.errors, Vec::<String>::new());
        assert_eq!(out.data[0].difficulty, 1);
        assert_eq!(out.data[0].points, 10);
    }

    #[test]
    fn tags_split_and_trim() {
        let out = parse_lines(&["Q,text,,,,,,,3,25,\" safety , onboarding ,,\",HR,"]);
        assert_eq!(out.errors, Vec::<String>::new());
        let q = &out.data[0];
        assert_eq!(q.tags, vec!["safety", "onboarding"]);
        assert_eq!(q.difficulty, 3);
        assert_eq!(q.points, 25);
        assert_eq!(q.category.as_deref(), Some("HR"));
        assert!(q.options.is_empty());
        assert!(q.correct_indices.is_empty());
    }

    #[test]
    fn bom_does_not_corrupt_first_header() {
        let text = format!("\u{feff}{}\nQ,single,a,b,,,2,,,,,,", HEADER);
        let out = parse_questions_csv(&text);
        assert_eq!(out.errors, Vec::<String>::new());
        assert_eq!(out.data[0].correct_indices, vec![2]);
    }

    #[test]
    fn quoted_commas_and_newlines_survive() {
        let text = format!(
            "{}\n\"Which line, exactly?\",single,\"a, then b\",\"c\nd\",,,1,,,,,,",
            HEADER
        );
        let out = parse_questions_csv(&text);
        assert_eq!(out.errors, Vec::<String>::new());
        let q = &out.data[0];
        assert_eq!(q.content, "Which line, exactly?");
        assert_eq!(q.options[0], "a, then b");
        assert_eq!(q.options[1], "c\nd");
    }

    #[test]
    fn blank_options_drop_but_order_is_kept() {
        let out = parse_lines(&["Q,multi,first,,third,fourth,\"1|2\",,,,,,"]);
        assert_eq!(out.errors, Vec::<String>::new());
        let q = &out.data[0];
        // option_2 was blank, so "third" compacts into position 2.
        assert_eq!(q.options, vec!["first", "third", "fourth"]);
        assert_eq!(q.correct_indices, vec![1, 2]);
    }

    #[test]
    fn missing_header_yields_error_not_panic() {
        let out = parse_questions_csv("");
        assert!(out.data.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].starts_with("row 1"));

        let out = parse_questions_csv("a,b,c\n1,2,3");
        assert!(out.data.is_empty());
        assert!(out.errors[0].contains("content and question_type"));
    }

    #[test]
    fn one_bad_row_does_not_abort_the_batch() {
        let out = parse_lines(&[
            "Good,single,a,b,,,2,,,,,,",
            "Bad,single,a,b,,,7,,,,,,",
            "Also good,text,,,,,,,,,,,",
        ]);
        assert_eq!(out.data.len(), 2);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].contains("row 3"));
    }
}
