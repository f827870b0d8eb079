//! Job catalogue CRUD.

mod read;
mod write;
