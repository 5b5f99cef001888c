mod clone_from_template_test;
mod dedicated_schema_test;
mod transaction_test;
