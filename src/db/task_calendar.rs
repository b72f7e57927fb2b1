//! Task calendar: which task set runs on which date

use chrono::NaiveDate;
use diesel::prelude::*;
use tracing::info;

use super::diesel_schema::task_calendar;
use super::models::{current_timestamp, date_key, CalendarEntry, NewCalendarEntry};
use super::task_sets::is_schedulable;
use crate::error::StoreError;

/// Calendar entry for a date
pub fn get_entry(
    conn: &mut SqliteConnection,
    date: NaiveDate,
) -> Result<Option<CalendarEntry>, StoreError> {
    task_calendar::table
        .filter(task_calendar::date.eq(date_key(date)))
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

/// Set scheduled for a date, falling back to `default_set_id` when unassigned
pub fn set_for_date(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    default_set_id: Option<&str>,
) -> Result<Option<String>, StoreError> {
    Ok(get_entry(conn, date)?
        .map(|entry| entry.set_id)
        .or_else(|| default_set_id.map(str::to_string)))
}

/// Entries within an inclusive date range
pub fn list_range(
    conn: &mut SqliteConnection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<CalendarEntry>, StoreError> {
    task_calendar::table
        .filter(task_calendar::date.ge(date_key(from)))
        .filter(task_calendar::date.le(date_key(to)))
        .order(task_calendar::date.asc())
        .load(conn)
        .map_err(StoreError::from)
}

/// Schedule a set on a date, replacing any previous assignment
pub fn assign_set(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    set_id: &str,
) -> Result<CalendarEntry, StoreError> {
    if !is_schedulable(conn, set_id)? {
        return Err(StoreError::Validation(format!(
            "Task set {} is inactive or has no active tasks",
            set_id
        )));
    }

    let key = date_key(date);
    if get_entry(conn, date)?.is_some() {
        diesel::update(task_calendar::table.filter(task_calendar::date.eq(&key)))
            .set((
                task_calendar::set_id.eq(set_id),
                task_calendar::updated_at.eq(current_timestamp()),
            ))
            .execute(conn)?;
    } else {
        diesel::insert_into(task_calendar::table)
            .values(&NewCalendarEntry { date: &key, set_id })
            .execute(conn)?;
    }

    info!(date = %key, set_id, "Task set scheduled");
    get_entry(conn, date)?
        .ok_or_else(|| StoreError::Internal("Failed to retrieve calendar entry".into()))
}

/// Remove the assignment for a date; returns false if none existed
pub fn unassign(conn: &mut SqliteConnection, date: NaiveDate) -> Result<bool, StoreError> {
    let deleted = diesel::delete(task_calendar::table.filter(task_calendar::date.eq(date_key(date))))
        .execute(conn)?;
    Ok(deleted > 0)
}
