
mod backtest_tests;
mod classification_tests;
mod optimizer_tests;
