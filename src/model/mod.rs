pub mod board;
pub mod work_item;
