use rusqlite::{types::Value as SqlValue, Connection};
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub owner_id: &'a str,
}

/// One stored score row, after numeric coercion of marks/attendance.
/// The direct-edit path does not constrain those columns, so they are
/// read as raw SQL values and coerced; a value that fails coercion is
/// carried as None and excluded from averages, never a hard failure.
#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub name: String,
    pub roll_number: String,
    pub subject: String,
    pub marks: Option<f64>,
    pub attendance: Option<f64>,
}

pub fn coerce_numeric(value: &SqlValue) -> Option<f64> {
    let n = match value {
        SqlValue::Integer(i) => *i as f64,
        SqlValue::Real(r) => *r,
        SqlValue::Text(s) => s.trim().parse::<f64>().ok()?,
        SqlValue::Null | SqlValue::Blob(_) => return None,
    };
    if n.is_finite() {
        Some(n)
    } else {
        None
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn mean_rounded(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut n = 0_usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n > 0 {
        round2(sum / n as f64)
    } else {
        0.0
    }
}

fn fetch_score_rows(
    conn: &Connection,
    owner_id: Option<&str>,
) -> Result<Vec<ScoreRow>, CalcError> {
    // rowid order is insertion order; first-appearance grouping and the
    // correlation cap both depend on it being stable.
    fn map_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ScoreRow> {
        Ok(ScoreRow {
            name: r.get(0)?,
            roll_number: r.get(1)?,
            subject: r.get(2)?,
            marks: coerce_numeric(&r.get::<_, SqlValue>(3)?),
            attendance: coerce_numeric(&r.get::<_, SqlValue>(4)?),
        })
    }

    let rows = match owner_id {
        Some(owner) => {
            let mut stmt = conn
                .prepare(
                    "SELECT name, roll_number, subject, marks, attendance
                     FROM score_records
                     WHERE owner_id = ?
                     ORDER BY rowid",
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            stmt.query_map([owner], map_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?
        }
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT name, roll_number, subject, marks, attendance
                     FROM score_records
                     ORDER BY rowid",
                )
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
            stmt.query_map([], map_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?
        }
    };
    Ok(rows)
}

/// Per-student aggregate over rows with a usable marks value, keyed by
/// (name, roll_number) in first-encounter order. Attendance is averaged
/// over the group's usable attendance values; a student entered under
/// several subjects may legitimately carry different attendance figures.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentAggregate {
    pub name: String,
    pub roll_number: String,
    pub avg_marks: f64,
    pub avg_attendance: f64,
}

pub fn group_students(rows: &[ScoreRow]) -> Vec<StudentAggregate> {
    struct Acc {
        marks_sum: f64,
        marks_n: usize,
        att_sum: f64,
        att_n: usize,
    }

    let mut order: Vec<(String, String)> = Vec::new();
    let mut accs: HashMap<(String, String), Acc> = HashMap::new();
    for row in rows {
        let Some(marks) = row.marks else {
            continue;
        };
        let key = (row.name.clone(), row.roll_number.clone());
        let acc = accs.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Acc {
                marks_sum: 0.0,
                marks_n: 0,
                att_sum: 0.0,
                att_n: 0,
            }
        });
        acc.marks_sum += marks;
        acc.marks_n += 1;
        if let Some(att) = row.attendance {
            acc.att_sum += att;
            acc.att_n += 1;
        }
    }

    order
        .into_iter()
        .map(|key| {
            let acc = &accs[&key];
            StudentAggregate {
                name: key.0,
                roll_number: key.1,
                avg_marks: acc.marks_sum / acc.marks_n as f64,
                avg_attendance: if acc.att_n > 0 {
                    acc.att_sum / acc.att_n as f64
                } else {
                    0.0
                },
            }
        })
        .collect()
}

/// Per-subject mean marks in first-appearance order, over rows with a
/// usable marks value. Subjects with no usable marks are omitted.
pub fn subject_means(rows: &[ScoreRow]) -> Vec<(String, f64)> {
    let mut order: Vec<String> = Vec::new();
    let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
    for row in rows {
        let Some(marks) = row.marks else {
            continue;
        };
        let entry = sums.entry(row.subject.clone()).or_insert_with(|| {
            order.push(row.subject.clone());
            (0.0, 0)
        });
        entry.0 += marks;
        entry.1 += 1;
    }
    order
        .into_iter()
        .map(|subject| {
            let (sum, n) = sums[&subject];
            let mean = sum / n as f64;
            (subject, mean)
        })
        .collect()
}

/// Histogram buckets over [0,40), [40,60), [60,80), [80,100]. The top
/// bucket is closed on both ends; marks outside [0,100] land in none.
pub const DISTRIBUTION_BUCKETS: [(&str, f64, f64); 4] = [
    ("Fail (0-39)", 0.0, 40.0),
    ("Average (40-59)", 40.0, 60.0),
    ("Good (60-79)", 60.0, 80.0),
    ("Excellent (80-100)", 80.0, 100.0),
];

pub fn distribution_counts(marks: &[f64]) -> [usize; 4] {
    let mut counts = [0_usize; 4];
    let last = DISTRIBUTION_BUCKETS.len() - 1;
    for &m in marks {
        for (i, &(_, lo, hi)) in DISTRIBUTION_BUCKETS.iter().enumerate() {
            let inside = if i == last {
                m >= lo && m <= hi
            } else {
                m >= lo && m < hi
            };
            if inside {
                counts[i] += 1;
                break;
            }
        }
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformerEntry {
    pub name: String,
    pub roll_number: String,
    pub avg_marks: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_students: usize,
    pub total_records: usize,
    pub avg_marks: f64,
    pub avg_attendance: f64,
    pub subject_avg: serde_json::Map<String, serde_json::Value>,
    pub top_performers: Vec<PerformerEntry>,
    pub low_performers: Vec<PerformerEntry>,
}

pub fn compute_dashboard_summary(ctx: &CalcContext<'_>) -> Result<DashboardSummary, CalcError> {
    let rows = fetch_score_rows(ctx.conn, Some(ctx.owner_id))?;
    Ok(dashboard_summary_from_rows(&rows))
}

pub fn dashboard_summary_from_rows(rows: &[ScoreRow]) -> DashboardSummary {
    // Students are counted by roll number alone; two names sharing a
    // roll number count as one.
    let total_students = rows
        .iter()
        .map(|r| r.roll_number.as_str())
        .collect::<HashSet<_>>()
        .len();
    let total_records = rows.len();
    let avg_marks = mean_rounded(rows.iter().filter_map(|r| r.marks));
    let avg_attendance = mean_rounded(rows.iter().filter_map(|r| r.attendance));

    let mut subject_avg = serde_json::Map::new();
    for (subject, mean) in subject_means(rows) {
        subject_avg.insert(subject, json!(round2(mean)));
    }

    let mut students = group_students(rows);
    // Stable sort: ties keep first-encounter order.
    students.sort_by(|a, b| b.avg_marks.partial_cmp(&a.avg_marks).unwrap_or(Ordering::Equal));

    let entry = |s: &StudentAggregate| PerformerEntry {
        name: s.name.clone(),
        roll_number: s.roll_number.clone(),
        avg_marks: round2(s.avg_marks),
    };
    let top_performers: Vec<PerformerEntry> = students.iter().take(5).map(entry).collect();

    let tail_start = students.len().saturating_sub(5);
    let mut low: Vec<&StudentAggregate> = students[tail_start..].iter().collect();
    low.sort_by(|a, b| a.avg_marks.partial_cmp(&b.avg_marks).unwrap_or(Ordering::Equal));
    let low_performers: Vec<PerformerEntry> = low.into_iter().map(entry).collect();

    DashboardSummary {
        total_students,
        total_records,
        avg_marks,
        avg_attendance,
        subject_avg,
        top_performers,
        low_performers,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceMark {
    pub attendance: f64,
    pub marks: f64,
}

/// Scatter payloads are truncated, not sampled; encounter order.
pub const CORRELATION_CAP: usize = 100;

#[derive(Debug)]
pub enum AnalyticsData {
    Empty,
    Ready {
        subjects: Vec<String>,
        subject_averages: Vec<f64>,
        distribution: serde_json::Map<String, serde_json::Value>,
        attendance_marks: Vec<AttendanceMark>,
    },
}

pub fn compute_analytics(ctx: &CalcContext<'_>) -> Result<AnalyticsData, CalcError> {
    let rows = fetch_score_rows(ctx.conn, Some(ctx.owner_id))?;
    Ok(analytics_from_rows(&rows))
}

pub fn analytics_from_rows(rows: &[ScoreRow]) -> AnalyticsData {
    // Chart data only uses rows where both figures coerce.
    let usable: Vec<ScoreRow> = rows
        .iter()
        .filter(|r| r.marks.is_some() && r.attendance.is_some())
        .cloned()
        .collect();
    if usable.is_empty() {
        return AnalyticsData::Empty;
    }

    let (subjects, subject_averages): (Vec<String>, Vec<f64>) = subject_means(&usable)
        .into_iter()
        .map(|(subject, mean)| (subject, round2(mean)))
        .unzip();

    let marks: Vec<f64> = usable.iter().filter_map(|r| r.marks).collect();
    let counts = distribution_counts(&marks);
    let mut distribution = serde_json::Map::new();
    for ((label, _, _), count) in DISTRIBUTION_BUCKETS.iter().zip(counts) {
        distribution.insert(label.to_string(), json!(count));
    }

    let attendance_marks: Vec<AttendanceMark> = usable
        .iter()
        .take(CORRELATION_CAP)
        .map(|r| AttendanceMark {
            attendance: r.attendance.unwrap_or(0.0),
            marks: r.marks.unwrap_or(0.0),
        })
        .collect();

    AnalyticsData::Ready {
        subjects,
        subject_averages,
        distribution,
        attendance_marks,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub rank: usize,
    pub name: String,
    pub roll_number: String,
    pub avg_marks: f64,
    pub avg_attendance: f64,
}

/// Rankings read every owner's records; all other views are owner
/// scoped. The global scope is the shipped behavior and stays.
pub fn compute_leaderboard(conn: &Connection) -> Result<Vec<LeaderboardRow>, CalcError> {
    let rows = fetch_score_rows(conn, None)?;
    Ok(leaderboard_from_rows(&rows))
}

pub fn leaderboard_from_rows(rows: &[ScoreRow]) -> Vec<LeaderboardRow> {
    let mut students = group_students(rows);
    students.sort_by(|a, b| b.avg_marks.partial_cmp(&a.avg_marks).unwrap_or(Ordering::Equal));
    students
        .into_iter()
        .enumerate()
        .map(|(i, s)| LeaderboardRow {
            rank: i + 1,
            name: s.name,
            roll_number: s.roll_number,
            avg_marks: round2(s.avg_marks),
            avg_attendance: round2(s.avg_attendance),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, roll: &str, subject: &str, marks: i64, attendance: i64) -> ScoreRow {
        ScoreRow {
            name: name.to_string(),
            roll_number: roll.to_string(),
            subject: subject.to_string(),
            marks: Some(marks as f64),
            attendance: Some(attendance as f64),
        }
    }

    #[test]
    fn round2_behaves() {
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(83.333333), 83.33);
        assert_eq!(round2(66.666666), 66.67);
        assert_eq!(round2(82.5), 82.5);
    }

    #[test]
    fn coercion_accepts_numbers_and_numeric_text() {
        assert_eq!(coerce_numeric(&SqlValue::Integer(88)), Some(88.0));
        assert_eq!(coerce_numeric(&SqlValue::Real(72.5)), Some(72.5));
        assert_eq!(coerce_numeric(&SqlValue::Text(" 64 ".into())), Some(64.0));
        assert_eq!(coerce_numeric(&SqlValue::Text("sixty".into())), None);
        assert_eq!(coerce_numeric(&SqlValue::Text("NaN".into())), None);
        assert_eq!(coerce_numeric(&SqlValue::Text("inf".into())), None);
        assert_eq!(coerce_numeric(&SqlValue::Null), None);
        assert_eq!(coerce_numeric(&SqlValue::Blob(vec![1, 2])), None);
    }

    #[test]
    fn distribution_bucket_edges() {
        // One mark per bucket.
        assert_eq!(distribution_counts(&[35.0, 45.0, 65.0, 85.0]), [1, 1, 1, 1]);
        // Boundary cases: 0 fails, 40 is Average, 80 is Excellent, 100 counts.
        assert_eq!(distribution_counts(&[0.0]), [1, 0, 0, 0]);
        assert_eq!(distribution_counts(&[40.0]), [0, 1, 0, 0]);
        assert_eq!(distribution_counts(&[60.0]), [0, 0, 1, 0]);
        assert_eq!(distribution_counts(&[80.0]), [0, 0, 0, 1]);
        assert_eq!(distribution_counts(&[100.0]), [0, 0, 0, 1]);
        // Out-of-range marks land in no bucket.
        assert_eq!(distribution_counts(&[-5.0, 150.0]), [0, 0, 0, 0]);
    }

    #[test]
    fn grouping_keeps_first_encounter_order_and_averages_attendance() {
        let rows = vec![
            row("Asha", "R1", "Mathematics", 80, 90),
            row("Ben", "R2", "Mathematics", 70, 60),
            row("Asha", "R1", "Physics", 60, 80),
        ];
        let groups = group_students(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Asha");
        assert_eq!(groups[0].avg_marks, 70.0);
        assert_eq!(groups[0].avg_attendance, 85.0);
        assert_eq!(groups[1].name, "Ben");
    }

    #[test]
    fn grouping_skips_rows_without_usable_marks() {
        let mut bad = row("Cara", "R3", "English", 0, 95);
        bad.marks = None;
        let rows = vec![bad, row("Dev", "R4", "English", 50, 50)];
        let groups = group_students(&rows);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Dev");
    }

    #[test]
    fn dashboard_empty_set_yields_zeros() {
        let summary = dashboard_summary_from_rows(&[]);
        assert_eq!(summary.total_students, 0);
        assert_eq!(summary.total_records, 0);
        assert_eq!(summary.avg_marks, 0.0);
        assert_eq!(summary.avg_attendance, 0.0);
        assert!(summary.subject_avg.is_empty());
        assert!(summary.top_performers.is_empty());
        assert!(summary.low_performers.is_empty());
    }

    #[test]
    fn dashboard_counts_students_by_roll_number_alone() {
        let rows = vec![
            row("Asha", "R1", "Mathematics", 80, 90),
            row("A. Rao", "R1", "Physics", 70, 90),
            row("Ben", "R2", "Mathematics", 60, 70),
        ];
        let summary = dashboard_summary_from_rows(&rows);
        assert_eq!(summary.total_students, 2);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.avg_marks, 70.0);
    }

    #[test]
    fn dashboard_subject_averages_keep_first_appearance_order() {
        let rows = vec![
            row("Asha", "R1", "Physics", 80, 90),
            row("Ben", "R2", "Mathematics", 60, 70),
            row("Cara", "R3", "Physics", 70, 80),
        ];
        let summary = dashboard_summary_from_rows(&rows);
        let keys: Vec<&String> = summary.subject_avg.keys().collect();
        assert_eq!(keys, ["Physics", "Mathematics"]);
        assert_eq!(summary.subject_avg["Physics"], serde_json::json!(75.0));
    }

    #[test]
    fn dashboard_low_performers_are_worst_first() {
        let rows: Vec<ScoreRow> = (0..7)
            .map(|i| {
                row(
                    &format!("S{}", i),
                    &format!("R{}", i),
                    "Mathematics",
                    50 + (i as i64) * 5,
                    80,
                )
            })
            .collect();
        let summary = dashboard_summary_from_rows(&rows);
        assert_eq!(summary.top_performers.len(), 5);
        assert_eq!(summary.low_performers.len(), 5);
        assert_eq!(summary.top_performers[0].avg_marks, 80.0);
        assert_eq!(summary.low_performers[0].avg_marks, 50.0);
        assert_eq!(summary.low_performers[4].avg_marks, 70.0);
    }

    #[test]
    fn dashboard_excludes_non_numeric_from_averages() {
        let mut junk = row("Eve", "R9", "Chemistry", 0, 0);
        junk.marks = None;
        junk.attendance = None;
        let rows = vec![junk, row("Fay", "R8", "Chemistry", 90, 100)];
        let summary = dashboard_summary_from_rows(&rows);
        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.avg_marks, 90.0);
        assert_eq!(summary.avg_attendance, 100.0);
    }

    #[test]
    fn analytics_empty_when_no_usable_rows() {
        assert!(matches!(analytics_from_rows(&[]), AnalyticsData::Empty));

        let mut junk = row("Eve", "R9", "Chemistry", 50, 0);
        junk.attendance = None;
        assert!(matches!(
            analytics_from_rows(&[junk]),
            AnalyticsData::Empty
        ));
    }

    #[test]
    fn analytics_payload_shape() {
        let rows = vec![
            row("Asha", "R1", "Mathematics", 35, 60),
            row("Ben", "R2", "Mathematics", 45, 70),
            row("Cara", "R3", "Physics", 65, 80),
            row("Dev", "R4", "Physics", 85, 90),
        ];
        let AnalyticsData::Ready {
            subjects,
            subject_averages,
            distribution,
            attendance_marks,
        } = analytics_from_rows(&rows)
        else {
            panic!("expected ready payload");
        };
        assert_eq!(subjects, ["Mathematics", "Physics"]);
        assert_eq!(subject_averages, [40.0, 75.0]);
        let labels: Vec<&String> = distribution.keys().collect();
        assert_eq!(
            labels,
            [
                "Fail (0-39)",
                "Average (40-59)",
                "Good (60-79)",
                "Excellent (80-100)"
            ]
        );
        for count in distribution.values() {
            assert_eq!(count, &serde_json::json!(1));
        }
        assert_eq!(attendance_marks.len(), 4);
        assert_eq!(
            attendance_marks[0],
            AttendanceMark {
                attendance: 60.0,
                marks: 35.0
            }
        );
    }

    #[test]
    fn analytics_correlation_is_truncated_to_cap() {
        let rows: Vec<ScoreRow> = (0..130)
            .map(|i| row(&format!("S{}", i), &format!("R{}", i), "English", 50, 50))
            .collect();
        let AnalyticsData::Ready {
            attendance_marks, ..
        } = analytics_from_rows(&rows)
        else {
            panic!("expected ready payload");
        };
        assert_eq!(attendance_marks.len(), CORRELATION_CAP);
    }

    #[test]
    fn leaderboard_ranks_are_sequential_with_stable_ties() {
        let rows = vec![
            row("Asha", "R1", "Mathematics", 90, 95),
            row("Ben", "R2", "Mathematics", 90, 85),
            row("Cara", "R3", "Mathematics", 70, 75),
        ];
        let rankings = leaderboard_from_rows(&rows);
        let ranks: Vec<usize> = rankings.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, [1, 2, 3]);
        // Tie between Asha and Ben keeps input order.
        assert_eq!(rankings[0].name, "Asha");
        assert_eq!(rankings[1].name, "Ben");
        assert_eq!(rankings[2].name, "Cara");
    }

    #[test]
    fn leaderboard_drops_students_without_usable_marks() {
        let mut attendance_only = row("Eve", "R9", "Biology", 0, 96);
        attendance_only.marks = None;
        let rows = vec![attendance_only, row("Fay", "R8", "Biology", 88, 92)];
        let rankings = leaderboard_from_rows(&rows);
        assert_eq!(rankings.len(), 1);
        assert_eq!(rankings[0].name, "Fay");
        assert_eq!(rankings[0].rank, 1);
    }
}
