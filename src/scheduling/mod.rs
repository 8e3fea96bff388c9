pub mod orphan_reaper;
pub mod trash_purge;
