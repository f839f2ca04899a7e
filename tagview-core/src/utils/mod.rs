pub mod send_time;
