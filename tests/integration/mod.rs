mod sandbox_factory_tests;
mod terminal_manager_tests;
