mod exchange;
mod helpers;
mod lifecycle;
