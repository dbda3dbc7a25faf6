mod persistence;
mod refs;
mod stm;
