mod clone_from_template_test;
mod dedicated_schema_test;
mod driver_test;
mod pool_test;
mod transaction_test;
