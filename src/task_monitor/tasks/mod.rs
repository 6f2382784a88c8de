pub mod overdue;
pub mod sendout;
