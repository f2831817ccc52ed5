//! Bot lifecycle events: status changes, failures, and completion with the
//! hand-off to transcript analysis.

use tracing::{debug, error, info, warn};

use super::{BotEvent, Outcome, ReconcileError, Reconciler};
use crate::analysis::Analysis;
use crate::meeting::{
    render_transcript, AssignedTask, BotState, BotStatusCode, Meeting, MeetingStatus,
    ProcessingStatus, TranscriptSegment,
};

/// Transcript waiting for analysis once the meeting lock is released.
#[derive(Debug, Clone)]
struct AnalysisJob {
    meeting_id: i64,
    manager_id: String,
    member_id: Option<String>,
    transcript: String,
}

impl Reconciler {
    pub async fn handle_bot_event(&self, event: &BotEvent) -> Result<Outcome, ReconcileError> {
        let bot_id = event.bot_id();
        let Some(meeting) = self.find_by_bot(bot_id).await? else {
            info!(bot_id, "Dropping bot event for unknown bot");
            return Ok(Outcome::Unmatched);
        };

        let guard = self.locks.lock(meeting.id).await;
        let (outcome, job) = self.retrying(|| self.apply_bot_event(event)).await?;
        drop(guard);

        // Analysis can be slow; it runs outside the lock and commits separately
        // so a failure never touches the persisted recording.
        if let Some(job) = job {
            if self.run_analysis(job).await? && outcome == Outcome::Unchanged {
                return Ok(Outcome::Applied);
            }
        }
        Ok(outcome)
    }

    async fn apply_bot_event(
        &self,
        event: &BotEvent,
    ) -> Result<(Outcome, Option<AnalysisJob>), ReconcileError> {
        let Some(meeting) = self.find_by_bot(event.bot_id()).await? else {
            return Ok((Outcome::Unmatched, None));
        };

        match event {
            BotEvent::StatusChange { code, .. } => {
                let target = code.bot_state();
                Ok((self.apply_status(meeting, code, target).await?, None))
            }
            BotEvent::Failed { code, .. } => {
                let code = code.clone().unwrap_or(BotStatusCode::MeetingError);
                Ok((
                    self.apply_status(meeting, &code, Some(BotState::Failed))
                        .await?,
                    None,
                ))
            }
            BotEvent::Complete {
                bot_id,
                transcript,
                recording_url,
            } => {
                self.complete(meeting, bot_id, transcript, recording_url.as_deref())
                    .await
            }
        }
    }

    async fn apply_status(
        &self,
        meeting: Meeting,
        code: &BotStatusCode,
        target: Option<BotState>,
    ) -> Result<Outcome, ReconcileError> {
        if meeting.bot_state.is_terminal() {
            debug!(meeting_id = meeting.id, code = code.as_str(), state = %meeting.bot_state,
                "Ignoring status for finished bot");
            return Ok(Outcome::Unchanged);
        }

        let mut updated = meeting.clone();
        if let Some(next) = target {
            if next != meeting.bot_state {
                if !meeting.bot_state.can_transition_to(next) {
                    debug!(meeting_id = meeting.id, from = %meeting.bot_state, to = %next,
                        "Ignoring out-of-order bot status");
                    return Ok(Outcome::Unchanged);
                }
                updated.bot_state = next;
            }
        }
        updated.status = MeetingStatus::parse(code.as_str());

        if updated == meeting {
            return Ok(Outcome::Unchanged);
        }

        let saved = self.save(updated).await?;
        info!(
            meeting_id = saved.id,
            code = code.as_str(),
            state = %saved.bot_state,
            "Applied bot status"
        );
        Ok(Outcome::Applied)
    }

    async fn complete(
        &self,
        meeting: Meeting,
        bot_id: &str,
        transcript: &[TranscriptSegment],
        recording_url: Option<&str>,
    ) -> Result<(Outcome, Option<AnalysisJob>), ReconcileError> {
        match meeting.bot_state {
            BotState::Completed => {
                // A redelivery is the chance to finish analysis a crash or a
                // lost task left behind.
                let job = self.pending_job(&meeting);
                debug!(meeting_id = meeting.id, resume_analysis = job.is_some(),
                    "Meeting already completed");
                return Ok((Outcome::Unchanged, job));
            }
            BotState::Failed | BotState::Cancelled => {
                info!(meeting_id = meeting.id, state = %meeting.bot_state,
                    "Ignoring completion for finished bot");
                return Ok((Outcome::Unchanged, None));
            }
            _ => {}
        }

        let (segments, recording_url) =
            self.completion_artifacts(bot_id, transcript, recording_url).await?;

        let mut updated = meeting.clone();
        updated.bot_state = BotState::Completed;
        updated.status = MeetingStatus::Completed;
        updated.recording_url = recording_url.or(meeting.recording_url.clone());
        updated.transcript = render_transcript(&segments).or(meeting.transcript.clone());

        let job = match (&updated.transcript, &self.summarizer) {
            (Some(_), Some(_)) => {
                updated.processing_status = ProcessingStatus::Processing;
                self.pending_job(&updated)
            }
            (Some(_), None) => {
                debug!(meeting_id = meeting.id, "No analysis service configured");
                updated.processing_status = ProcessingStatus::Completed;
                None
            }
            (None, _) => {
                warn!(meeting_id = meeting.id, bot_id, "Recording completed without a transcript");
                updated.processing_status = ProcessingStatus::Failed;
                None
            }
        };

        let saved = self.save(updated).await?;
        info!(
            meeting_id = saved.id,
            bot_id,
            has_recording = saved.recording_url.is_some(),
            "Meeting recording completed"
        );
        Ok((Outcome::Applied, job))
    }

    /// Prefer what the webhook carried; pull the rest from the provider.
    async fn completion_artifacts(
        &self,
        bot_id: &str,
        transcript: &[TranscriptSegment],
        recording_url: Option<&str>,
    ) -> Result<(Vec<TranscriptSegment>, Option<String>), ReconcileError> {
        if !transcript.is_empty() && recording_url.is_some() {
            return Ok((transcript.to_vec(), recording_url.map(str::to_string)));
        }

        match self.bots.get_bot(bot_id).await {
            Ok(details) => {
                let segments = if transcript.is_empty() {
                    details.transcript
                } else {
                    transcript.to_vec()
                };
                let url = recording_url.map(str::to_string).or(details.recording_url);
                Ok((segments, url))
            }
            Err(err) if !transcript.is_empty() || recording_url.is_some() => {
                warn!(bot_id, error = %err, "Could not fetch remaining recording artifacts");
                Ok((transcript.to_vec(), recording_url.map(str::to_string)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Finish analysis for a completed recording still marked `processing`.
    /// Without a transcript or an analysis service the status is settled
    /// the way completion would have settled it.
    pub async fn resume_analysis(&self, meeting_id: i64) -> Result<Outcome, ReconcileError> {
        let guard = self.locks.lock(meeting_id).await;
        let (outcome, job) = self.retrying(|| self.settle_pending(meeting_id)).await?;
        drop(guard);

        let Some(job) = job else {
            return Ok(outcome);
        };
        if self.run_analysis(job).await? {
            Ok(Outcome::Applied)
        } else {
            Ok(Outcome::Unchanged)
        }
    }

    async fn settle_pending(
        &self,
        meeting_id: i64,
    ) -> Result<(Outcome, Option<AnalysisJob>), ReconcileError> {
        let Some(meeting) = self.load(meeting_id).await? else {
            return Ok((Outcome::Unmatched, None));
        };
        if meeting.processing_status != ProcessingStatus::Processing {
            return Ok((Outcome::Unchanged, None));
        }
        if let Some(job) = self.pending_job(&meeting) {
            return Ok((Outcome::Unchanged, Some(job)));
        }

        let mut updated = meeting;
        updated.processing_status = if updated.transcript.is_some() {
            ProcessingStatus::Completed
        } else {
            ProcessingStatus::Failed
        };
        let saved = self.save(updated).await?;
        info!(meeting_id, status = saved.processing_status.as_str(),
            "Settled analysis that can no longer run");
        Ok((Outcome::Applied, None))
    }

    fn pending_job(&self, meeting: &Meeting) -> Option<AnalysisJob> {
        if meeting.processing_status != ProcessingStatus::Processing || self.summarizer.is_none() {
            return None;
        }
        meeting.transcript.as_ref().map(|transcript| AnalysisJob {
            meeting_id: meeting.id,
            manager_id: meeting.user_id.clone(),
            member_id: meeting.member_id.clone(),
            transcript: transcript.clone(),
        })
    }

    /// Returns whether a result was stored. A job already running for the
    /// same meeting is left to finish on its own.
    async fn run_analysis(&self, job: AnalysisJob) -> Result<bool, ReconcileError> {
        let Some(summarizer) = &self.summarizer else {
            return Ok(false);
        };
        let Some(_claim) = self.analyzing.try_claim(job.meeting_id) else {
            debug!(meeting_id = job.meeting_id, "Analysis already running");
            return Ok(false);
        };

        let result = match summarizer.analyze(&job.transcript).await {
            Ok(analysis) => {
                let tasks = self.assign_tasks(&job, &analysis).await;
                Some((analysis, tasks))
            }
            Err(err) => {
                error!(meeting_id = job.meeting_id, "Transcript analysis failed: {:#}", err);
                None
            }
        };

        let _guard = self.locks.lock(job.meeting_id).await;
        self.retrying(|| self.store_analysis(job.meeting_id, result.as_ref()))
            .await
    }

    async fn assign_tasks(&self, job: &AnalysisJob, analysis: &Analysis) -> Vec<AssignedTask> {
        let unassigned = || {
            analysis
                .tasks
                .iter()
                .map(|text| AssignedTask {
                    text: text.clone(),
                    assigned_to: None,
                    reasoning: None,
                })
                .collect::<Vec<_>>()
        };

        let (Some(assigner), Some(member_id)) = (&self.assigner, &job.member_id) else {
            return unassigned();
        };
        if analysis.tasks.is_empty() {
            return Vec::new();
        }

        match assigner
            .assign(&analysis.tasks, &job.manager_id, member_id)
            .await
        {
            Ok(assigned) => assigned,
            Err(err) => {
                warn!(meeting_id = job.meeting_id, "Task assignment failed, keeping tasks unassigned: {:#}", err);
                unassigned()
            }
        }
    }

    async fn store_analysis(
        &self,
        meeting_id: i64,
        result: Option<&(Analysis, Vec<AssignedTask>)>,
    ) -> Result<bool, ReconcileError> {
        let Some(meeting) = self.load(meeting_id).await? else {
            return Ok(false);
        };
        if meeting.processing_status != ProcessingStatus::Processing {
            debug!(meeting_id, status = meeting.processing_status.as_str(),
                "Analysis result no longer expected");
            return Ok(false);
        }

        let mut updated = meeting;
        match result {
            Some((analysis, tasks)) => {
                updated.summary = Some(analysis.summary.clone()).filter(|s| !s.is_empty());
                updated.wins = analysis.wins.clone();
                updated.areas_for_support = analysis.areas_for_support.clone();
                updated.tasks = tasks.clone();
                updated.processing_status = ProcessingStatus::Completed;
            }
            None => updated.processing_status = ProcessingStatus::Failed,
        }

        let saved = self.save(updated).await?;
        info!(
            meeting_id,
            status = saved.processing_status.as_str(),
            "Stored transcript analysis"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_joining_call_moves_scheduled_to_joining() {
        let harness = Harness::new();
        let id = harness.meeting_with_bot("bot-1", BotState::Scheduled).await;

        let event = BotEvent::StatusChange {
            bot_id: "bot-1".to_string(),
            code: BotStatusCode::JoiningCall,
        };
        assert_eq!(
            harness.reconciler.handle_bot_event(&event).await.unwrap(),
            Outcome::Applied
        );
        assert_eq!(
            harness.reconciler.handle_bot_event(&event).await.unwrap(),
            Outcome::Unchanged
        );

        let meeting = harness.meeting(id).await;
        assert_eq!(meeting.bot_state, BotState::Joining);
        assert_eq!(meeting.status.as_str(), "joining_call");
        assert!(meeting.status.is_live());
        assert_eq!(meeting.version, 2);
    }

    #[tokio::test]
    async fn test_unknown_bot_is_dropped() {
        let harness = Harness::new();
        let id = harness.meeting_with_bot("bot-1", BotState::Scheduled).await;

        let outcome = harness
            .reconciler
            .handle_bot_event(&BotEvent::StatusChange {
                bot_id: "stranger".to_string(),
                code: BotStatusCode::JoiningCall,
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Unmatched);
        assert_eq!(harness.meeting(id).await.version, 1);
    }

    #[tokio::test]
    async fn test_out_of_order_status_is_ignored() {
        let harness = Harness::new();
        let id = harness.meeting_with_bot("bot-1", BotState::InProgress).await;

        let outcome = harness
            .reconciler
            .handle_bot_event(&BotEvent::StatusChange {
                bot_id: "bot-1".to_string(),
                code: BotStatusCode::JoiningCall,
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(harness.meeting(id).await.bot_state, BotState::InProgress);
    }

    #[tokio::test]
    async fn test_failure_is_terminal() {
        let harness = Harness::new();
        let id = harness.meeting_with_bot("bot-1", BotState::Joining).await;

        harness
            .reconciler
            .handle_bot_event(&BotEvent::Failed {
                bot_id: "bot-1".to_string(),
                code: Some(BotStatusCode::BotRejected),
            })
            .await
            .unwrap();
        let outcome = harness
            .reconciler
            .handle_bot_event(&BotEvent::StatusChange {
                bot_id: "bot-1".to_string(),
                code: BotStatusCode::InCallRecording,
            })
            .await
            .unwrap();

        let meeting = harness.meeting(id).await;
        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(meeting.bot_state, BotState::Failed);
        assert_eq!(meeting.status.as_str(), "bot_rejected");
    }

    #[tokio::test]
    async fn test_complete_uses_payload_and_runs_analysis() {
        let harness = Harness::with_analysis(Ok(sample_analysis()));
        let id = harness.meeting_with_bot("bot-1", BotState::InProgress).await;

        let outcome = harness
            .reconciler
            .handle_bot_event(&complete_event("bot-1", true))
            .await
            .unwrap();

        let meeting = harness.meeting(id).await;
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(meeting.bot_state, BotState::Completed);
        assert_eq!(meeting.status, MeetingStatus::Completed);
        assert_eq!(meeting.processing_status, ProcessingStatus::Completed);
        assert_eq!(meeting.transcript.as_deref(), Some("Ana: Let us ship it"));
        assert_eq!(meeting.recording_url.as_deref(), Some("https://cdn.example.com/1.mp4"));
        assert_eq!(meeting.summary.as_deref(), Some("Weekly sync"));
        assert_eq!(meeting.tasks.len(), 1);
        assert!(harness.bots.calls().is_empty());
    }

    #[tokio::test]
    async fn test_complete_pulls_artifacts_when_missing() {
        let harness = Harness::new();
        harness.bots.set_details("bot-1", sample_details("bot-1"));
        let id = harness.meeting_with_bot("bot-1", BotState::InProgress).await;

        harness
            .reconciler
            .handle_bot_event(&complete_event("bot-1", false))
            .await
            .unwrap();

        let meeting = harness.meeting(id).await;
        assert_eq!(harness.bots.calls(), vec!["get_bot:bot-1".to_string()]);
        assert_eq!(meeting.transcript.as_deref(), Some("Ben: Pulled from provider"));
        // No analysis configured: processing is done once the transcript is stored.
        assert_eq!(meeting.processing_status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn test_summarizer_failure_keeps_transcript() {
        let harness = Harness::with_analysis(Err("model unavailable".to_string()));
        let id = harness.meeting_with_bot("bot-1", BotState::InProgress).await;

        harness
            .reconciler
            .handle_bot_event(&complete_event("bot-1", true))
            .await
            .unwrap();

        let meeting = harness.meeting(id).await;
        assert_eq!(meeting.bot_state, BotState::Completed);
        assert_eq!(meeting.processing_status, ProcessingStatus::Failed);
        assert_eq!(meeting.transcript.as_deref(), Some("Ana: Let us ship it"));
        assert!(meeting.summary.is_none());
    }

    #[tokio::test]
    async fn test_assignment_failure_keeps_unassigned_tasks() {
        let harness = Harness::with_failing_assigner(Ok(sample_analysis()));
        let id = harness.meeting_with_bot("bot-1", BotState::InProgress).await;

        harness
            .reconciler
            .handle_bot_event(&complete_event("bot-1", true))
            .await
            .unwrap();

        let meeting = harness.meeting(id).await;
        assert_eq!(meeting.processing_status, ProcessingStatus::Completed);
        assert_eq!(meeting.tasks[0].text, "Send recap");
        assert!(meeting.tasks[0].assigned_to.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_unchanged() {
        let harness = Harness::new();
        harness.meeting_with_bot("bot-1", BotState::InProgress).await;
        let event = complete_event("bot-1", true);

        harness.reconciler.handle_bot_event(&event).await.unwrap();
        let outcome = harness.reconciler.handle_bot_event(&event).await.unwrap();

        assert_eq!(outcome, Outcome::Unchanged);
    }

    async fn stuck_in_processing(harness: &Harness, transcript: Option<&str>) -> i64 {
        let id = harness.meeting_with_bot("bot-1", BotState::InProgress).await;
        let mut meeting = harness.meeting(id).await;
        meeting.bot_state = BotState::Completed;
        meeting.status = MeetingStatus::Completed;
        meeting.processing_status = ProcessingStatus::Processing;
        meeting.transcript = transcript.map(str::to_string);
        harness.update(meeting).await;
        id
    }

    #[tokio::test]
    async fn test_redelivered_completion_resumes_stuck_analysis() {
        let harness = Harness::with_analysis(Ok(sample_analysis()));
        let id = stuck_in_processing(&harness, Some("Ana: Let us ship it")).await;

        let outcome = harness
            .reconciler
            .handle_bot_event(&complete_event("bot-1", true))
            .await
            .unwrap();

        let meeting = harness.meeting(id).await;
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(meeting.processing_status, ProcessingStatus::Completed);
        assert_eq!(meeting.summary.as_deref(), Some("Weekly sync"));
        assert!(harness.bots.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resume_analysis_settles_when_analysis_cannot_run() {
        let harness = Harness::new();
        let with_transcript = stuck_in_processing(&harness, Some("Ana: Done")).await;

        let outcome = harness.reconciler.resume_analysis(with_transcript).await.unwrap();
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(
            harness.meeting(with_transcript).await.processing_status,
            ProcessingStatus::Completed
        );

        let harness = Harness::with_analysis(Ok(sample_analysis()));
        let without_transcript = stuck_in_processing(&harness, None).await;
        harness.reconciler.resume_analysis(without_transcript).await.unwrap();
        assert_eq!(
            harness.meeting(without_transcript).await.processing_status,
            ProcessingStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_resume_analysis_leaves_running_job_alone() {
        let harness = Harness::with_analysis(Ok(sample_analysis()));
        let id = stuck_in_processing(&harness, Some("Ana: Let us ship it")).await;
        let _running = harness.reconciler.analyzing.try_claim(id).unwrap();

        let outcome = harness.reconciler.resume_analysis(id).await.unwrap();

        assert_eq!(outcome, Outcome::Unchanged);
        let meeting = harness.meeting(id).await;
        assert_eq!(meeting.processing_status, ProcessingStatus::Processing);
        assert!(meeting.summary.is_none());
    }

    #[tokio::test]
    async fn test_resume_analysis_ignores_finished_meeting() {
        let harness = Harness::with_analysis(Ok(sample_analysis()));
        let id = harness.meeting_with_bot("bot-1", BotState::InProgress).await;
        harness
            .reconciler
            .handle_bot_event(&complete_event("bot-1", true))
            .await
            .unwrap();

        let outcome = harness.reconciler.resume_analysis(id).await.unwrap();

        assert_eq!(outcome, Outcome::Unchanged);
    }
}
