//! Operator commands over the job store: stand-in for the conversational flows.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Args, Subcommand};
use cronpost_scheduler::crontab::{format_timestamp, next_run, parse_timezone, upcoming, validate};
use cronpost_scheduler::reschedule::job_timezone;
use cronpost_scheduler::{ContentType, Job, NewJob, SqliteJobStore};
use tracing::info;

#[derive(Subcommand)]
pub enum JobsCommand {
    /// Create a job; it is dispatched once it has a crontab
    Add(AddJob),
    /// Attach or replace a job's crontab
    Schedule {
        id: String,
        /// Five fields: minute hour day-of-month month day-of-week
        crontab: String,
        #[arg(long, default_value_t = 0)]
        by: i64,
    },
    /// List jobs that are not removed
    List {
        #[arg(long, allow_hyphen_values = true)]
        chat_id: Option<i64>,
    },
    /// Print one job with its next runs
    Show {
        id: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        upcoming: usize,
    },
    Pause {
        id: String,
        #[arg(long, default_value_t = 0)]
        by: i64,
    },
    /// Unpause; the next run is evaluated from now
    Resume {
        id: String,
        #[arg(long, default_value_t = 0)]
        by: i64,
    },
    /// Soft delete
    Remove {
        id: String,
        #[arg(long, default_value_t = 0)]
        by: i64,
    },
}

#[derive(Args)]
pub struct AddJob {
    #[arg(long, allow_hyphen_values = true)]
    pub chat_id: i64,
    #[arg(long)]
    pub name: String,
    /// HTML text, HTML caption, or poll JSON
    #[arg(long, default_value = "")]
    pub content: String,
    /// text, single_photo, photo_group or poll
    #[arg(long, default_value = "text")]
    pub content_type: ContentType,
    /// Photo id, or `;`-joined ids for a photo group
    #[arg(long, default_value = "")]
    pub photo_id: String,
    #[arg(long, allow_hyphen_values = true)]
    pub channel_id: Option<i64>,
    #[arg(long)]
    pub thread_id: Option<i64>,
    #[arg(long)]
    pub bot_token: Option<String>,
    #[arg(long, default_value_t = false)]
    pub delete_previous: bool,
    #[arg(long)]
    pub crontab: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub by: i64,
}

#[derive(Subcommand)]
pub enum ChatsCommand {
    /// Set a chat's IANA timezone and re-evaluate its jobs
    SetTimezone {
        #[arg(allow_hyphen_values = true)]
        chat_id: i64,
        timezone: String,
        #[arg(long, default_value_t = 0)]
        by: i64,
    },
}

pub fn run_jobs(
    store: &SqliteJobStore,
    command: JobsCommand,
    canonical: Tz,
    now: DateTime<Utc>,
) -> cronpost_scheduler::Result<()> {
    let now_ts = format_timestamp(now, canonical);
    match command {
        JobsCommand::Add(add) => {
            // evaluate first so a crontab without a future run leaves no row behind
            let first = match &add.crontab {
                Some(crontab) => {
                    let tz = chat_timezone(store, add.chat_id, canonical)?;
                    Some((crontab.clone(), next_run(crontab, tz, canonical, now)?))
                }
                None => None,
            };
            let job = store.add_job(
                &NewJob {
                    chat_id: add.chat_id,
                    channel_id: add.channel_id,
                    jobname: add.name,
                    content: add.content,
                    content_type: add.content_type,
                    photo_id: add.photo_id,
                    photo_group_id: String::new(),
                    option_delete_previous: add.delete_previous,
                    user_bot_token: add.bot_token,
                    message_thread_id: add.thread_id,
                    created_by: add.by,
                },
                &now_ts,
            )?;
            match first {
                Some((crontab, next)) => {
                    store.set_schedule(&job.id, &crontab, &next, add.by, &now_ts)?;
                    println!("{}  next run {}", job.id, next.user);
                }
                None => println!("{}  (no schedule yet)", job.id),
            }
        }
        JobsCommand::Schedule { id, crontab, by } => {
            let job = store.get_job(&id)?;
            schedule(store, &job, &crontab, by, canonical, now)?;
        }
        JobsCommand::List { chat_id } => {
            for job in store.list_jobs(chat_id)? {
                println!("{}", summary_line(&job));
            }
        }
        JobsCommand::Show { id, upcoming: count } => {
            let job = store.get_job(&id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            if !job.crontab.is_empty() {
                let tz = job_timezone(&job, canonical);
                println!("upcoming ({tz}):");
                for run in upcoming(&job.crontab, tz, now, count)? {
                    println!("  {}", format_timestamp(run, tz));
                }
            }
        }
        JobsCommand::Pause { id, by } => store.pause_job(&id, by, &now_ts)?,
        JobsCommand::Resume { id, by } => {
            let job = store.get_job(&id)?;
            let next = next_run(&job.crontab, job_timezone(&job, canonical), canonical, now)?;
            store.resume_job(&id, &next, by, &now_ts)?;
            println!("{id}  next run {}", next.user);
        }
        JobsCommand::Remove { id, by } => store.remove_job(&id, by, &now_ts)?,
    }
    Ok(())
}

pub fn run_chats(
    store: &SqliteJobStore,
    command: ChatsCommand,
    canonical: Tz,
    now: DateTime<Utc>,
) -> cronpost_scheduler::Result<()> {
    match command {
        ChatsCommand::SetTimezone {
            chat_id,
            timezone,
            by,
        } => {
            let tz = parse_timezone(&timezone)?;
            let now_ts = format_timestamp(now, canonical);
            store.set_chat_timezone(chat_id, tz.name(), &now_ts)?;

            // schedules are evaluated in the chat's zone, so every run moves
            let mut moved = 0;
            for job in store.list_jobs(Some(chat_id))? {
                if job.crontab.is_empty() || validate(&job.crontab).is_err() {
                    continue;
                }
                let next = next_run(&job.crontab, tz, canonical, now)?;
                store.set_schedule(&job.id, &job.crontab, &next, by, &now_ts)?;
                moved += 1;
            }
            info!(chat_id, timezone = %tz, rescheduled = moved, "chat timezone updated");
        }
    }
    Ok(())
}

fn schedule(
    store: &SqliteJobStore,
    job: &Job,
    crontab: &str,
    by: i64,
    canonical: Tz,
    now: DateTime<Utc>,
) -> cronpost_scheduler::Result<()> {
    let next = next_run(crontab, job_timezone(job, canonical), canonical, now)?;
    store.set_schedule(&job.id, crontab, &next, by, &format_timestamp(now, canonical))?;
    println!("{}  next run {}", job.id, next.user);
    Ok(())
}

fn chat_timezone(store: &SqliteJobStore, chat_id: i64, canonical: Tz) -> cronpost_scheduler::Result<Tz> {
    Ok(store
        .chat_timezone(chat_id)?
        .and_then(|name| parse_timezone(&name).ok())
        .unwrap_or(canonical))
}

fn summary_line(job: &Job) -> String {
    let state = if job.crontab.is_empty() {
        "unscheduled"
    } else if !job.paused_ts.is_empty() {
        "paused"
    } else {
        "active"
    };
    format!(
        "{}  chat={}  {:<20}  {:<16}  {:<11}  next={}  errors={}",
        job.id,
        job.chat_id,
        job.jobname,
        job.crontab,
        state,
        job.user_nextrun_ts,
        job.errors.len()
    )
}
