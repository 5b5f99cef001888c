pub(crate) mod prepare;
