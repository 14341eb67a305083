mod record;
mod transfer;
