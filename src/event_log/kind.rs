use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of event a run records.
/// WHY: declaration order is execution order; a timer may only measure from a kind
/// declared at or before the kind being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Init,
    MatchResume,
    ScanShard,
    PreVerify,
    ThumbLookup,
    ConfAlpha,
    ConfAlphaNeg,
    DirectAlphaNeg,
    CheckPng,
    WriteRow,
    PngSuccess,
    PngDone,
    AverageTime,
    RoutineException,
    BanUrl,
    UrlException,
    EarlyHalt,
    HaltFinished,
    LogNotify,
    ResumePoint,
    BonVoyage,
    InternalLogException,
}

impl EventKind {
    pub const COUNT: usize = 22;

    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::Init,
        EventKind::MatchResume,
        EventKind::ScanShard,
        EventKind::PreVerify,
        EventKind::ThumbLookup,
        EventKind::ConfAlpha,
        EventKind::ConfAlphaNeg,
        EventKind::DirectAlphaNeg,
        EventKind::CheckPng,
        EventKind::WriteRow,
        EventKind::PngSuccess,
        EventKind::PngDone,
        EventKind::AverageTime,
        EventKind::RoutineException,
        EventKind::BanUrl,
        EventKind::UrlException,
        EventKind::EarlyHalt,
        EventKind::HaltFinished,
        EventKind::LogNotify,
        EventKind::ResumePoint,
        EventKind::BonVoyage,
        EventKind::InternalLogException,
    ];

    /// Position in declaration order, used to index per-kind storage
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Init => "Init",
            EventKind::MatchResume => "MatchResume",
            EventKind::ScanShard => "ScanShard",
            EventKind::PreVerify => "PreVerify",
            EventKind::ThumbLookup => "ThumbLookup",
            EventKind::ConfAlpha => "ConfAlpha",
            EventKind::ConfAlphaNeg => "ConfAlphaNeg",
            EventKind::DirectAlphaNeg => "DirectAlphaNeg",
            EventKind::CheckPng => "CheckPng",
            EventKind::WriteRow => "WriteRow",
            EventKind::PngSuccess => "PngSuccess",
            EventKind::PngDone => "PngDone",
            EventKind::AverageTime => "AverageTime",
            EventKind::RoutineException => "RoutineException",
            EventKind::BanUrl => "BanUrl",
            EventKind::UrlException => "UrlException",
            EventKind::EarlyHalt => "EarlyHalt",
            EventKind::HaltFinished => "HaltFinished",
            EventKind::LogNotify => "LogNotify",
            EventKind::ResumePoint => "ResumePoint",
            EventKind::BonVoyage => "BonVoyage",
            EventKind::InternalLogException => "InternalLogException",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
