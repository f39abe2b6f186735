mod metadata;
mod records;
